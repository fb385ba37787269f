//! Contact form relay through Mailjet.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::error::{GatewayError, Result};

/// Default Mailjet API endpoint.
pub const DEFAULT_MAILJET_URL: &str = "https://api.mailjet.com";

/// Reply sent to the form after a successful relay.
pub const SENT_MESSAGE: &str = "Mensaje enviado con éxito. Agradecemos su comunicación.";

/// A submitted contact form.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    /// Sender's name.
    pub name: String,
    /// Sender's address, used as reply-to.
    pub email: String,
    /// Kind of request, shown in the subject.
    pub request_type: String,
    /// Free text.
    pub message: String,
}

impl ContactForm {
    /// Parses a form body. Every field must be a non-blank string.
    pub fn parse(body: &Value) -> Result<Self> {
        let form = Self::deserialize(body).map_err(GatewayError::validation)?;
        let fields = [
            ("name", &form.name),
            ("email", &form.email),
            ("requestType", &form.request_type),
            ("message", &form.message),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(GatewayError::validation(format!("field `{field}` is empty")));
        }
        Ok(form)
    }

    fn subject(&self) -> String {
        format!("Nueva Consulta de Contacto: {}", self.request_type)
    }

    fn html(&self) -> String {
        format!(
            "<h3>Nueva consulta desde el formulario de contacto</h3>\
             <p><strong>Nombre:</strong> {}</p>\
             <p><strong>Email:</strong> {}</p>\
             <p><strong>Tipo de consulta:</strong> {}</p>\
             <p><strong>Mensaje:</strong></p><p>{}</p>",
            escape_html(&self.name),
            escape_html(&self.email),
            escape_html(&self.request_type),
            escape_html(&self.message).replace('\n', "<br>"),
        )
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Delivers contact forms.
#[async_trait]
pub trait Mailer: Send + Sync + std::fmt::Debug {
    /// Sends the form to the configured recipient.
    async fn send(&self, form: &ContactForm) -> Result<()>;
}

/// [`Mailer`] backed by the Mailjet v3.1 send API.
#[derive(Clone)]
pub struct MailjetMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    sender: String,
    recipient: String,
}

impl std::fmt::Debug for MailjetMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailjetMailer")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .finish()
    }
}

impl MailjetMailer {
    /// Create a mailer with API credentials and the sender/recipient addresses.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_MAILJET_URL.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    /// Override the API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn payload(&self, form: &ContactForm) -> Value {
        json!({
            "Messages": [{
                "From": { "Email": self.sender, "Name": "Formulario de Contacto" },
                "To": [{ "Email": self.recipient, "Name": "Destinatario Contacto" }],
                "Subject": form.subject(),
                "HTMLPart": form.html(),
                "ReplyTo": { "Email": form.email, "Name": form.name },
            }]
        })
    }
}

#[async_trait]
impl Mailer for MailjetMailer {
    #[instrument(skip(self, form), fields(request_type = %form.request_type))]
    async fn send(&self, form: &ContactForm) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/v3.1/send", self.base_url))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&self.payload(form))
            .send()
            .await
            .map_err(|e| GatewayError::Mail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Mail(format!("HTTP {status}: {body}")));
        }
        info!("Contact form relayed");
        Ok(())
    }
}
