use serde::{Deserialize, Serialize};

/// Out-of-band message bodies. Placeholders: `{driver}`, `{destination}`, `{date}`, `{time}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplates {
    pub assignment: String,
    pub confirmation_reminder: String,
    pub pre_trip_reminder: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            assignment: "New trip assigned\n\nHi {driver}, you have a new trip to {destination} on {date} at {time}. Please open the app to review it and confirm.".into(),
            confirmation_reminder: "Reminder: you have not confirmed yet\n\nHi {driver}, your trip to {destination} on {date} at {time} is still waiting for your confirmation.".into(),
            pre_trip_reminder: "Your trip starts soon\n\nHi {driver}, your trip to {destination} departs today at {time}. Have a safe trip!".into(),
        }
    }
}

/// Values substituted into a [`MessageTemplates`] entry.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub driver: &'a str,
    pub destination: &'a str,
    pub date: String,
    pub time: &'a str,
}

pub fn render_template(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{driver}", ctx.driver)
        .replace("{destination}", ctx.destination)
        .replace("{date}", &ctx.date)
        .replace("{time}", ctx.time)
}
