//! Prompt templating.
//!
//! `${name}` placeholders are replaced with the subject's metadata values.
//! `${code}` defaults to the subject key and `${analysis_date}` to the date the
//! call is made. Unknown placeholders are left verbatim.

use std::borrow::Cow;

use chrono::NaiveDate;

use crate::domain::Subject;

/// Built-in stock analysis prompt, used when neither the submission nor the
/// config supplies a template.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Provide a professional investment analysis of stock ${code} (${name}).

Stock information:
- Code: ${code}
- Name: ${name}
- Market: ${market}
- Industry: ${industry}
- Exchange: ${exchange}
- Analysis date: ${analysis_date}

Cover the following:

## 1. Technical analysis
- Current price trend
- Support and resistance levels
- Technical indicators
- Volume

## 2. Fundamental analysis
- Financial condition
- Industry position and competitive advantages
- Growth prospects
- Risks

## 3. Recommendation
- Buy / hold / sell
- Target price range
- Time horizon
- Risk warnings

## 4. Market outlook
- Industry trends
- Macroeconomic influences
- Short and long term outlook
";

/// Render `template` for one subject.
pub fn render_prompt(template: &str, subject: &Subject, analysis_date: NaiveDate) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match lookup(name, subject, analysis_date) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(name: &str, subject: &'a Subject, analysis_date: NaiveDate) -> Option<Cow<'a, str>> {
    if let Some(value) = subject.metadata.get(name) {
        return Some(match value {
            serde_json::Value::String(s) => Cow::Borrowed(s.as_str()),
            serde_json::Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        });
    }
    match name {
        "code" => Some(Cow::Borrowed(subject.key.as_str())),
        "analysis_date" => Some(Cow::Owned(analysis_date.format("%Y-%m-%d").to_string())),
        _ => None,
    }
}
