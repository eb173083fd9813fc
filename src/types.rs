use serde::{Deserialize, Serialize};

/// Closed label taxonomy the browser extension acts on. The first five are
/// produced by the rule tables; the rest only come out of the AI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Work,
    Personal,
    Spam,
    Important,
    Review,
    Newsletters,
    Finance,
    Shopping,
    Travel,
    Education,
    #[serde(rename = "Social-Media")]
    SocialMedia,
    Health,
    Legal,
    Technical,
    Projects,
    Support,
    Entertainment,
}

/// Which path produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    Ai,
    RuleBased,
    /// AI path failed, rule tables answered instead.
    Fallback,
    /// Unexpected internal failure, degraded placeholder result.
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
    pub reasoning: String,
    pub method: Method,
}

impl Classification {
    /// Degraded-but-valid result returned when everything else failed.
    /// The consumer always gets a label it can act on.
    pub fn emergency(reasoning: impl Into<String>) -> Self {
        Self {
            label: Label::Review,
            confidence: 0.1,
            reasoning: reasoning.into(),
            method: Method::Emergency,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyRequest {
    pub content: String,
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    #[serde(flatten)]
    pub classification: Classification,
    pub processing_time: f64,
    pub timestamp: i64,
    pub server_version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct BatchClassifyRequest {
    pub emails: Vec<ClassifyRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchClassifyResponse {
    pub results: Vec<Classification>,
    pub processing_time: f64,
    pub total_emails: usize,
    pub timestamp: i64,
    pub server_version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ComposeRequest {
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ComposeResponse {
    pub draft: String,
    pub subject: String,
    pub style: String,
    pub timestamp: i64,
    pub server_version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Deserialize)]
pub struct Correction {
    pub email_id: String,
    pub correct_label: Label,
    #[serde(default)]
    pub original_label: Option<Label>,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub status: &'static str,
    pub corrections_processed: usize,
    pub model_updated: bool,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_status: &'static str,
    pub mode: String,
    pub version: &'static str,
    pub timestamp: i64,
}
