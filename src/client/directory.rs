//! Thread and model directory calls.
//!
//! List calls are paginated: each page carries `nextCursor` until the last.
//! The `*_all` helpers walk every page. Errors are returned as-is, no retries.

use crate::app::logging::Logger;
use crate::error::RpcError;
use crate::rpc::protocol::{
    methods, ListParams, ModelInfo, Page, ThreadItem, ThreadPayload, ThreadResponse,
    ThreadResumeParams, ThreadStartParams, ThreadSummary, UserInput,
};
use crate::rpc::RpcSession;
use crate::thread::{ChatMessage, Role, Thread};
use std::collections::HashSet;
use std::future::Future;

/// Upper bound on pages fetched by one `*_all` call.
const MAX_PAGES: usize = 100;

/// A thread ready for the controller, plus the settings the agent reported.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedThread {
    pub thread: Thread,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Every model the agent offers, deduplicated, with the default resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
    pub default_model: Option<String>,
}

impl ModelCatalog {
    pub fn from_models(models: Vec<ModelInfo>) -> Self {
        let mut seen = HashSet::new();
        let models: Vec<ModelInfo> = models
            .into_iter()
            .filter(|model| seen.insert(model.id.clone()))
            .collect();
        let default_model = models
            .iter()
            .find(|model| model.is_default)
            .or_else(|| models.first())
            .map(|model| model.id.clone());
        Self {
            models,
            default_model,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|model| model.id == id || model.model == id)
    }

    /// Effort to send with `model`: the requested one if supported, else the model default.
    pub fn resolve_effort(&self, model: &str, requested: Option<&str>) -> Option<String> {
        let info = self.get(model)?;
        if let Some(requested) = requested {
            if info
                .supported_reasoning_efforts
                .iter()
                .any(|option| option.reasoning_effort == requested)
            {
                return Some(requested.to_string());
            }
        }
        info.default_reasoning_effort.clone()
    }
}

pub struct Directory<'a> {
    session: &'a RpcSession,
    log: Logger,
}

impl<'a> Directory<'a> {
    pub fn new(session: &'a RpcSession, log: Logger) -> Self {
        Self { session, log }
    }

    pub async fn list_threads(
        &self,
        cursor: Option<String>,
        limit: Option<u32>,
    ) -> Result<Page<ThreadSummary>, RpcError> {
        self.session
            .call_typed(methods::THREAD_LIST, ListParams { cursor, limit })
            .await
    }

    pub async fn list_all_threads(&self) -> Result<Vec<ThreadSummary>, RpcError> {
        let threads = collect_pages(methods::THREAD_LIST, |cursor| self.list_threads(cursor, None)).await?;
        self.log.debug(&format!("listed {} thread(s)", threads.len()));
        Ok(threads)
    }

    pub async fn list_models(&self, cursor: Option<String>) -> Result<Page<ModelInfo>, RpcError> {
        self.session
            .call_typed(methods::MODEL_LIST, ListParams { cursor, limit: None })
            .await
    }

    pub async fn list_all_models(&self) -> Result<ModelCatalog, RpcError> {
        let models = collect_pages(methods::MODEL_LIST, |cursor| self.list_models(cursor)).await?;
        let catalog = ModelCatalog::from_models(models);
        self.log.debug(&format!(
            "listed {} model(s), default {:?}",
            catalog.models.len(),
            catalog.default_model
        ));
        Ok(catalog)
    }

    pub async fn start_thread(&self, params: ThreadStartParams) -> Result<OpenedThread, RpcError> {
        let response: ThreadResponse = self
            .session
            .call_typed(methods::THREAD_START, params)
            .await?;
        self.log.info(&format!("started thread {}", response.thread.id));
        Ok(opened(response))
    }

    pub async fn resume_thread(&self, thread_id: &str) -> Result<OpenedThread, RpcError> {
        let response: ThreadResponse = self
            .session
            .call_typed(
                methods::THREAD_RESUME,
                ThreadResumeParams {
                    thread_id: thread_id.to_string(),
                },
            )
            .await?;
        self.log.info(&format!(
            "resumed thread {} ({} turn(s))",
            response.thread.id,
            response.thread.turns.len()
        ));
        Ok(opened(response))
    }
}

fn opened(response: ThreadResponse) -> OpenedThread {
    OpenedThread {
        thread: rebuild_thread(response.thread),
        model: response.model,
        reasoning_effort: response.reasoning_effort,
    }
}

/// Rebuild the transcript from stored turn items. Only user and agent
/// messages are kept; every rebuilt message is final.
pub fn rebuild_thread(payload: ThreadPayload) -> Thread {
    let mut messages = Vec::new();
    for (turn_index, turn) in payload.turns.into_iter().enumerate() {
        for (item_index, item) in turn.items.into_iter().enumerate() {
            let fallback_id = || format!("turn{turn_index}-item{item_index}");
            match item {
                ThreadItem::UserMessage { id, content } => {
                    let text = content
                        .iter()
                        .filter_map(|input| match input {
                            UserInput::Text { text } => Some(text.as_str()),
                            UserInput::Other => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    if text.is_empty() {
                        continue;
                    }
                    messages.push(ChatMessage {
                        id: id.unwrap_or_else(fallback_id),
                        role: Role::User,
                        text,
                        is_streaming: false,
                    });
                }
                ThreadItem::AgentMessage { id, text } => {
                    if text.is_empty() {
                        continue;
                    }
                    messages.push(ChatMessage {
                        id: id.unwrap_or_else(fallback_id),
                        role: Role::Assistant,
                        text,
                        is_streaming: false,
                    });
                }
                ThreadItem::Other => {}
            }
        }
    }
    Thread::with_messages(payload.id, messages)
}

/// Walk pages until `nextCursor` is absent.
///
/// A cursor that repeats or a listing longer than [`MAX_PAGES`] would never
/// finish; both fail the call rather than return a partial listing.
async fn collect_pages<T, F, Fut>(method: &str, mut fetch: F) -> Result<Vec<T>, RpcError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, RpcError>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    let mut seen = HashSet::new();
    for _ in 0..MAX_PAGES {
        let page = fetch(cursor.take()).await?;
        items.extend(page.items);
        let Some(next) = page.next_cursor else {
            return Ok(items);
        };
        if !seen.insert(next.clone()) {
            return Err(RpcError::InvalidResult {
                method: method.to_string(),
                message: format!("cursor {next:?} repeated"),
            });
        }
        cursor = Some(next);
    }
    Err(RpcError::InvalidResult {
        method: method.to_string(),
        message: format!("still paging after {MAX_PAGES} pages"),
    })
}
