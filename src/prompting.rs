use chrono::{Datelike, Duration, NaiveDate, Weekday};
use minijinja::{context, Environment};
use serde::Serialize;

use crate::types::BotLanguage;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");
const PDF_DOCUMENT_TEMPLATE: &str = include_str!("prompts/pdf_document.html.j2");

pub struct SystemPromptContext<'a> {
    pub bot_name: &'a str,
    pub business_name: &'a str,
    pub language: BotLanguage,
    pub context: &'a str,
    pub today: NaiveDate,
    pub appointments_enabled: bool,
    pub tool_names: &'a [&'a str],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayReference {
    pub label: &'static str,
    pub weekday: &'static str,
    pub date: String,
}

/// The exact sentence the model must use when the knowledge does not cover a question.
pub fn fallback_sentence(language: BotLanguage) -> &'static str {
    match language {
        BotLanguage::En => {
            "I'm sorry, I don't have information about that. Please contact us directly for more details."
        }
        BotLanguage::He => "מצטערים, אין לי מידע בנושא הזה. אנא צרו איתנו קשר ישירות לפרטים נוספים.",
    }
}

/// Shown to visitors when the model could not be reached at all.
pub fn apology_sentence(language: BotLanguage) -> &'static str {
    match language {
        BotLanguage::En => "I'm sorry, something went wrong on our side. Please try again in a moment.",
        BotLanguage::He => "מצטערים, משהו השתבש אצלנו. אנא נסו שוב בעוד רגע.",
    }
}

fn language_name(language: BotLanguage) -> &'static str {
    match language {
        BotLanguage::En => "English",
        BotLanguage::He => "Hebrew",
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Today plus the next two calendar days.
pub fn date_references(today: NaiveDate) -> Vec<DayReference> {
    ["Today", "Tomorrow", "Day after tomorrow"]
        .into_iter()
        .enumerate()
        .map(|(offset, label)| {
            let date = today + Duration::days(offset as i64);
            DayReference {
                label,
                weekday: weekday_name(date.weekday()),
                date: date.format("%Y-%m-%d").to_string(),
            }
        })
        .collect()
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }
    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            bot_name => display_or(ctx.bot_name, "Assistant"),
            business_name => display_or(ctx.business_name, "our business"),
            language_name => language_name(ctx.language),
            days => date_references(ctx.today),
            has_context => !ctx.context.trim().is_empty(),
            context => ctx.context.trim(),
            fallback => fallback_sentence(ctx.language),
            appointments_enabled => ctx.appointments_enabled,
            has_tools => !ctx.tool_names.is_empty(),
            tool_names => ctx.tool_names,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn display_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default
    } else {
        trimmed
    }
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let fallback = fallback_sentence(ctx.language);
    let mut prompt = format!(
        "You are {}. Always reply in {}.\n",
        display_or(ctx.bot_name, "Assistant"),
        language_name(ctx.language)
    );
    for day in date_references(ctx.today) {
        prompt.push_str(&format!("- {}: {}, {}\n", day.label, day.weekday, day.date));
    }
    if ctx.context.trim().is_empty() {
        prompt.push_str(&format!(
            "\nNo knowledge is available. Reply with exactly: \"{fallback}\"\n"
        ));
    } else {
        prompt.push_str(&format!(
            "\nAnswer EXCLUSIVELY from the knowledge below. Otherwise reply with exactly: \"{fallback}\"\n\nKnowledge:\n{}\n",
            ctx.context.trim()
        ));
    }
    if ctx.appointments_enabled {
        prompt.push_str(
            "\nBefore calling schedule_appointment, collect name, email, phone and time, validate the email, and get explicit confirmation.\n",
        );
    }
    prompt
}

pub struct PdfDocumentContext<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub business_name: Option<&'a str>,
    pub language: BotLanguage,
    pub generated_at: &'a str,
}

pub fn render_pdf_html(ctx: &PdfDocumentContext<'_>) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("pdf_document.html.j2", PDF_DOCUMENT_TEMPLATE)?;
    let template = env.get_template("pdf_document.html.j2")?;
    template.render(context! {
        title => ctx.title,
        content => ctx.content,
        business_name => ctx.business_name,
        language => ctx.language.code(),
        direction => if ctx.language == BotLanguage::He { "rtl" } else { "ltr" },
        generated_at => ctx.generated_at,
    })
}
