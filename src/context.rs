//! Shared logging context for one unit of work.
//!
//! Every record formatted while a unit of work runs picks up the attributes
//! stored here (request id, processing timer, customer ids, ...). Storage is
//! execution-context-local: inside [`scope`] / [`sync_scope`] the attributes
//! live in a tokio task-local; plain threads outside a tokio runtime use a
//! thread-local. Tokio tasks that never entered a scope have no context:
//! reads come back empty and writes are ignored. Two concurrent requests
//! therefore never observe each other's values.
//!
//! ```no_run
//! use clinic_log::context::{self, ContextStore, LocalContext};
//!
//! # async fn handle() {}
//! # async fn run() {
//! context::scope(Some("req-1".to_string()), async {
//!     assert_eq!(
//!         LocalContext.get_param(context::REQUEST_ID).and_then(|v| v.as_json().cloned()),
//!         Some("req-1".into()),
//!     );
//!     handle().await;
//! })
//! .await;
//! # }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::futures::TaskLocalFuture;
use uuid::Uuid;

use crate::timer::ElapsedTimer;

/// Key holding the correlation id of the current unit of work.
pub const REQUEST_ID: &str = crate::record::REQUEST_ID;

/// Key holding the [`ElapsedTimer`] started by [`ContextStore::init`].
pub const START_PROCESSING_TIMER: &str = "startProcessingTimer";

/// Keys with this prefix are bookkeeping and never leave [`ContextStore::get`].
pub const INTERNAL_PREFIX: &str = "__";

/// A value stored in the shared context.
#[derive(Debug, Clone)]
pub enum ContextValue {
    Json(Value),
    Timer(ElapsedTimer),
}

impl ContextValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ContextValue::Json(value) => Some(value),
            ContextValue::Timer(_) => None,
        }
    }

    pub fn as_timer(&self) -> Option<&ElapsedTimer> {
        match self {
            ContextValue::Timer(timer) => Some(timer),
            ContextValue::Json(_) => None,
        }
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Json(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Json(Value::String(value))
    }
}

impl From<ElapsedTimer> for ContextValue {
    fn from(timer: ElapsedTimer) -> Self {
        ContextValue::Timer(timer)
    }
}

/// Attribute name → value.
pub type ContextMap = BTreeMap<String, ContextValue>;

tokio::task_local! {
    static TASK_CONTEXT: RefCell<ContextMap>;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<ContextMap> = RefCell::new(BTreeMap::new());
}

static UNSCOPED_WRITE_REPORTED: AtomicBool = AtomicBool::new(false);

fn in_task_scope() -> bool {
    TASK_CONTEXT.try_with(|_| ()).is_ok()
}

/// Run `f` against the store of the calling execution context.
///
/// Inside a [`scope`] that is the task-local; on a thread outside any tokio
/// runtime it is the thread-local. A runtime thread without a scope has no
/// store: its thread-local is shared by every task the worker polls.
fn with_current<R>(f: impl FnOnce(&RefCell<ContextMap>) -> R) -> Option<R> {
    if in_task_scope() {
        Some(TASK_CONTEXT.with(f))
    } else if Handle::try_current().is_ok() {
        None
    } else {
        Some(THREAD_CONTEXT.with(f))
    }
}

fn report_unscoped_write() {
    if !UNSCOPED_WRITE_REPORTED.swap(true, Ordering::Relaxed) {
        eprintln!(
            "log context written from a tokio task outside a log scope; \
             the write is ignored, wrap the task with context::scope or in_log_scope"
        );
    }
}

/// Generate a new request id (UUID v4, hyphenated).
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Attributes every unit of work starts with.
pub fn fresh_context(request_id: Option<String>) -> ContextMap {
    let request_id = request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_request_id);

    let mut map = ContextMap::new();
    map.insert(REQUEST_ID.to_string(), request_id.into());
    map.insert(START_PROCESSING_TIMER.to_string(), ElapsedTimer::new().into());
    map
}

/// Access to the shared context of the calling execution context.
///
/// The logger facade holds one of these instead of reaching for a global,
/// so tests and embedders can swap the storage strategy.
pub trait ContextStore: Send + Sync {
    /// Start a new unit of work: drop previous attributes, then set
    /// `requestId` (given or generated) and a fresh `startProcessingTimer`.
    /// Returns the effective request id.
    fn init(&self, request_id: Option<String>) -> String;

    /// Merge `attributes` into the store, overwriting existing keys.
    fn set(&self, attributes: ContextMap);

    /// Snapshot of all attributes except internal ones.
    fn get(&self) -> ContextMap;

    fn get_param(&self, key: &str) -> Option<ContextValue>;
}

/// Task-local inside a [`scope`], thread-local on threads outside a tokio
/// runtime, absent for unscoped tokio tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalContext;

impl ContextStore for LocalContext {
    fn init(&self, request_id: Option<String>) -> String {
        let fresh = fresh_context(request_id);
        let id = fresh
            .get(REQUEST_ID)
            .and_then(ContextValue::as_json)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if with_current(|cell| *cell.borrow_mut() = fresh).is_none() {
            report_unscoped_write();
        }
        id
    }

    fn set(&self, attributes: ContextMap) {
        if with_current(|cell| cell.borrow_mut().extend(attributes)).is_none() {
            report_unscoped_write();
        }
    }

    fn get(&self) -> ContextMap {
        with_current(|cell| {
            cell.borrow()
                .iter()
                .filter(|(key, _)| !key.starts_with(INTERNAL_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    fn get_param(&self, key: &str) -> Option<ContextValue> {
        if key.starts_with(INTERNAL_PREFIX) {
            return None;
        }
        with_current(|cell| cell.borrow().get(key).cloned()).flatten()
    }
}

/// Run `fut` as its own unit of work with a freshly initialized context.
pub fn scope<F>(request_id: Option<String>, fut: F) -> TaskLocalFuture<RefCell<ContextMap>, F>
where
    F: Future,
{
    scope_with(fresh_context(request_id), fut)
}

/// Run `fut` with the given attributes as its context.
///
/// Use with [`ContextStore::get`] to carry the current request's context
/// into a spawned task, which would otherwise start without one.
pub fn scope_with<F>(attributes: ContextMap, fut: F) -> TaskLocalFuture<RefCell<ContextMap>, F>
where
    F: Future,
{
    TASK_CONTEXT.scope(RefCell::new(attributes), fut)
}

/// Synchronous counterpart of [`scope`]; the calling thread's own context
/// is untouched once `f` returns.
pub fn sync_scope<R>(request_id: Option<String>, f: impl FnOnce() -> R) -> R {
    TASK_CONTEXT.sync_scope(RefCell::new(fresh_context(request_id)), f)
}

pub trait FutureExt: Future + Sized {
    fn in_log_scope(self, request_id: Option<String>) -> TaskLocalFuture<RefCell<ContextMap>, Self>;
}

impl<F> FutureExt for F
where
    F: Future,
{
    fn in_log_scope(self, request_id: Option<String>) -> TaskLocalFuture<RefCell<ContextMap>, Self> {
        scope(request_id, self)
    }
}
