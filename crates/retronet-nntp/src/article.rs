use crate::subject::{simplify_subject, subject_is_reply};
use crate::threader::Threadable;

/// A minimal article: the three headers threading cares about. Real
/// clients can implement [`Threadable`] on their own message type
/// instead; this one is handy for tools and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    message_id: String,
    subject: String,
    references: Vec<String>,
}

impl Article {
    pub fn new(
        message_id: impl Into<String>,
        subject: impl Into<String>,
        references: Vec<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            subject: subject.into(),
            references,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl Threadable for Article {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn references(&self) -> &[String] {
        &self.references
    }

    fn simplified_subject(&self) -> String {
        simplify_subject(&self.subject)
    }

    fn subject_is_reply(&self) -> bool {
        subject_is_reply(&self.subject)
    }
}
