use std::collections::HashMap;

use serde_json::Value;

use crate::adapters::RenderedContent;
use crate::error::NotificationError;
use crate::types::ExportNotification;

const SUCCESS_SUBJECT: &str = "[Exports] {{label}} is ready";
const SUCCESS_BODY: &str = "Hello,\n\n\
Your export \"{{label}}\" ({{format}}, {{row_count}} rows) finished at {{finished_at}}.\n\
You can download it here: {{location}}\n";

const FAILURE_SUBJECT: &str = "[Exports] {{label}} failed";
const FAILURE_BODY: &str = "Hello,\n\n\
Your export \"{{label}}\" ({{format}}) could not be produced.\n\
Reason: {{reason}}\n";

/// Template renderer using `{{variable}}` placeholders.
///
/// Unknown placeholders are left in place.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub subject: Option<String>,
    pub body: String,
    pub html_body: Option<String>,
}

impl Template {
    pub fn text(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: Some(subject.into()),
            body: body.into(),
            html_body: None,
        }
    }
}

impl TemplateRenderer {
    /// Empty renderer.
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Renderer holding the built-in export outcome templates.
    pub fn with_defaults() -> Self {
        let mut renderer = Self::new();
        renderer.register(Template::text(
            ExportNotification::SUCCESS_TEMPLATE,
            SUCCESS_SUBJECT,
            SUCCESS_BODY,
        ));
        renderer.register(Template::text(
            ExportNotification::FAILURE_TEMPLATE,
            FAILURE_SUBJECT,
            FAILURE_BODY,
        ));
        renderer
    }

    /// Add or replace a template.
    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn render(
        &self,
        template_id: &str,
        data: &HashMap<String, Value>,
    ) -> Result<RenderedContent, NotificationError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| NotificationError::TemplateNotFound(template_id.to_string()))?;

        Ok(RenderedContent {
            subject: template.subject.as_deref().map(|s| substitute(s, data)),
            body: substitute(&template.body, data),
            html_body: template.html_body.as_deref().map(|s| substitute(s, data)),
        })
    }

    /// Render the message for an export outcome.
    pub fn render_notification(
        &self,
        notification: &ExportNotification,
    ) -> Result<RenderedContent, NotificationError> {
        self.render(notification.template_id(), &notification.template_data())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn substitute(template: &str, data: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match data.get(key) {
            Some(value) => out.push_str(&display_value(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
