//! Prompt assembly and answer generation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::document::Chunk;
use crate::error::RagError;
use crate::llm::GenerativeModel;

/// Question used for the key-insights view.
pub const KEY_INSIGHTS_QUESTION: &str = "Extract 5 key insights from this paper in bullet points.";

/// Question used for the one-line summary view.
pub const ONE_LINE_SUMMARY_QUESTION: &str = "Give a one-line summary of the paper.";

/// Question used for the full summary view.
pub const SUMMARY_QUESTION: &str = "Provide a comprehensive summary of the document.";

/// Question used for the structured insights report.
pub const INSIGHTS_REPORT_QUESTION: &str = "Analyze this document. Provide a structured response \
     with: 1. A concise Executive Summary. 2. Three Key Insights. 3. Three Strategic Takeaways. \
     Format clearly.";

/// A fixed question routed through the normal ask path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CannedQuery {
    /// Five key insights as bullet points.
    KeyInsights,
    /// A single-sentence summary.
    OneLineSummary,
    /// A comprehensive summary.
    Summary,
    /// Executive summary, insights and takeaways.
    InsightsReport,
    /// Plain-language definition of a term.
    DefineTerm(String),
}

impl CannedQuery {
    /// The question text sent to retrieval and the model.
    pub fn question(&self) -> String {
        match self {
            Self::KeyInsights => KEY_INSIGHTS_QUESTION.to_string(),
            Self::OneLineSummary => ONE_LINE_SUMMARY_QUESTION.to_string(),
            Self::Summary => SUMMARY_QUESTION.to_string(),
            Self::InsightsReport => INSIGHTS_REPORT_QUESTION.to_string(),
            Self::DefineTerm(term) => format!("Explain the term '{}' in simple words.", term.trim()),
        }
    }
}

/// Render the answer prompt. Chunks are joined nearest first.
pub fn render_prompt(question: &str, context: &[Chunk]) -> String {
    let context = context.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");
    format!(
        "Use the following context to answer the question.\n\
         If you don't know the answer, say you don't know.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer:"
    )
}

/// Turn a failure on the query path into the text shown to the user.
pub fn describe_failure(error: &RagError) -> String {
    match error {
        RagError::IndexNotFound | RagError::InvalidInput(_) => error.to_string(),
        RagError::IncompatibleIndex { .. } => format!(
            "The stored document index cannot be used with the current embedding model. \
             Please upload the PDF again. ({error})"
        ),
        RagError::GenerativeModel { .. } => format!(
            "The language model could not produce an answer right now. Please try again. ({error})"
        ),
        _ => format!(
            "Error while processing your question: {error}. Please ensure the PDF was uploaded correctly."
        ),
    }
}

/// Builds prompts from retrieved chunks and delegates to a [`GenerativeModel`].
#[derive(Clone)]
pub struct AnswerComposer {
    model: Arc<dyn GenerativeModel>,
}

impl AnswerComposer {
    /// Create a composer for `model`.
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    /// Answer `question` from `context`.
    ///
    /// Never fails: a model error or timeout becomes an explanatory answer.
    pub async fn compose(&self, question: &str, context: &[Chunk]) -> String {
        let prompt = render_prompt(question, context);
        match self.model.generate(&prompt).await {
            Ok(answer) => {
                info!(model = self.model.name(), context_chunks = context.len(), "composed answer");
                answer
            }
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "generative model call failed");
                describe_failure(&e)
            }
        }
    }
}

impl std::fmt::Debug for AnswerComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerComposer").field("model", &self.model.name()).finish()
    }
}
