// Request
//
// The output side of one query request. Results are serialized into the
// response document as they arrive; errors, warnings and the final state are
// collected and rendered into the document's suffix once the pipeline is
// done.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use crossbeam::select;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::common::StopSignal;
use crate::query::executor::config::ExecutionConfig;
use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::output::{Output, State};
use crate::query::executor::phase::Phase;
use crate::query::executor::pipeline::RunningPipeline;
use crate::query::executor::result::{QueryError, map_error_to_http_status};
use crate::server::settings::{RequestOptions, ServerSettings};
use crate::server::transport::Transport;
use crate::server::writer::{Append, BufferedWriter};

const PRETTY_PREFIX: &str = "    ";
const PRETTY_INDENT: &str = "    ";

pub struct Request {
    pub(super) id: String,
    pub(super) options: RequestOptions,
    pub(super) settings: Arc<ServerSettings>,
    pub(super) writer: BufferedWriter,
    /// Line prefix and indent of the envelope
    pub(super) prefix: String,
    pub(super) indent: String,
    /// Line prefix of result items, one level deeper than the envelope
    result_prefix: String,
    state: Mutex<State>,
    pub(super) result_count: AtomicU64,
    pub(super) result_size: AtomicU64,
    pub(super) mutation_count: AtomicU64,
    pub(super) sort_count: AtomicU64,
    errors: Mutex<Vec<QueryError>>,
    warnings: Mutex<Vec<QueryError>>,
    stop_execute: StopSignal,
    close_notify: Receiver<()>,
    request_time: Instant,
    service_time: Mutex<Instant>,
    /// Elapsed and execution time, fixed when the request completes
    pub(super) completion: Mutex<(Duration, Duration)>,
}

impl Request {
    pub fn new(
        settings: Arc<ServerSettings>,
        options: RequestOptions,
        transport: Box<dyn Transport>,
    ) -> Self {
        let close_notify = transport.close_notify();
        let (prefix, indent) = if options.pretty(&settings) {
            (PRETTY_PREFIX, PRETTY_INDENT)
        } else {
            ("", "")
        };
        let writer = BufferedWriter::new(
            transport,
            Arc::clone(settings.pool()),
            settings.writer().flush_interval,
        );
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            options,
            settings,
            writer,
            prefix: prefix.to_string(),
            indent: indent.to_string(),
            result_prefix: format!("{}{}", prefix, indent),
            state: Mutex::new(State::Running),
            result_count: AtomicU64::new(0),
            result_size: AtomicU64::new(0),
            mutation_count: AtomicU64::new(0),
            sort_count: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            stop_execute: StopSignal::new(),
            close_notify,
            request_time: now,
            service_time: Mutex::new(now),
            completion: Mutex::new((Duration::ZERO, Duration::ZERO)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Execution context for this request's pipeline
    pub fn new_context(self: &Arc<Self>, config: ExecutionConfig) -> Context {
        Context::new(self.id.clone(), Arc::clone(self) as Arc<dyn Output>)
            .with_config(config)
            .with_named_args(self.options.named_args.clone())
            .with_positional_args(self.options.positional_args.clone())
            .with_consistency(self.options.consistency)
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Fatal is terminal; a timed out or closed request does not become
    /// stopped or completed afterwards.
    pub fn set_state(&self, state: State) {
        let mut current = self.state.lock();
        match (*current, state) {
            (State::Fatal, _) => {}
            (State::Timeout | State::Closed, State::Stopped | State::Completed) => {}
            _ => *current = state,
        }
    }

    pub fn result_count(&self) -> u64 {
        self.result_count.load(Ordering::Acquire)
    }

    pub fn result_size(&self) -> u64 {
        self.result_size.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> Vec<QueryError> {
        self.errors.lock().clone()
    }

    pub fn warnings(&self) -> Vec<QueryError> {
        self.warnings.lock().clone()
    }

    /// Ask a running request to stop
    pub fn stop(&self) {
        self.stop_execute.fire();
    }

    /// Write the response of a request that failed before it could run
    pub fn failed(&self) {
        self.set_state(State::Fatal);
        self.mark_completion();
        let written = self.writer.write_str("{\n")
            && self.write_request_id()
            && self.write_client_context_id()
            && self.write_closing(State::Fatal, true, None, None);
        if !written {
            debug!("request {}: failure document incomplete", self.id);
        }
        self.writer.no_more_data();
    }

    fn mark_completion(&self) {
        let execution = self.service_time.lock().elapsed();
        *self.completion.lock() = (self.request_time.elapsed(), execution);
    }

    /// Serialize one result into the document. A serialization failure is
    /// rolled back by the writer and makes the request fatal.
    pub(super) fn append_result<F>(&self, write: F) -> bool
    where
        F: FnOnce(&mut Vec<u8>, &str, &str) -> serde_json::Result<()>,
    {
        if self.halted() {
            return false;
        }
        self.writer.time_flush();

        let lead = if self.result_count.load(Ordering::Acquire) == 0 {
            "\n"
        } else {
            ",\n"
        };
        let appended = self.writer.append_item(lead, &self.result_prefix, |buf| {
            write(buf, &self.result_prefix, &self.indent)
        });
        match appended {
            Append::Written(size) => {
                self.result_size.fetch_add(size as u64, Ordering::AcqRel);
                self.result_count.fetch_add(1, Ordering::AcqRel);
                true
            }
            Append::Refused => {
                self.set_state(State::Closed);
                false
            }
            Append::Invalid(err) => {
                self.error(QueryError::InvalidJson(err.to_string()));
                self.set_state(State::Fatal);
                false
            }
        }
    }

    /// Cancel the pipeline and wait for its terminal stage to exit
    fn abort(&self, context: &Context, pipeline: &RunningPipeline) {
        context.cancel();
        pipeline.stop();
        let _ = pipeline.done().recv();
    }
}

impl Output for Request {
    fn result(&self, item: &Item) -> bool {
        self.append_result(|buf, prefix, indent| item.write_json(buf, prefix, indent))
    }

    fn error(&self, err: QueryError) {
        self.errors.lock().push(err);
    }

    fn warning(&self, warning: QueryError) {
        let mut warnings = self.warnings.lock();
        if warning.is_once_only() {
            let msg = warning.to_string();
            if warnings.iter().any(|w| w.is_once_only() && w.to_string() == msg) {
                return;
            }
        }
        warnings.push(warning);
    }

    fn fail(&self, err: QueryError) {
        self.set_state(State::Fatal);
        self.writer.set_status(map_error_to_http_status(&err, 500));
        self.error(err);
    }

    fn halted(&self) -> bool {
        self.state() != State::Running
    }

    fn add_mutation_count(&self, count: u64) {
        self.mutation_count.fetch_add(count, Ordering::AcqRel);
    }

    fn add_sort_count(&self, count: u64) {
        self.sort_count.fetch_add(count, Ordering::AcqRel);
    }

    fn execute(&self, context: &Context, pipeline: RunningPipeline, signature: Option<&Value>) {
        let started = Instant::now();
        *self.service_time.lock() = started;
        self.write_prefix(signature);

        let deadline = match self.options.timeout {
            Some(timeout) => channel::after(timeout),
            None => channel::never(),
        };
        select! {
            recv(pipeline.done()) -> _ => self.set_state(State::Completed),
            recv(self.stop_execute.receiver()) -> _ => {
                self.set_state(State::Stopped);
                self.abort(context, &pipeline);
            }
            recv(self.close_notify) -> _ => {
                self.set_state(State::Closed);
                self.abort(context, &pipeline);
            }
            recv(deadline) -> _ => {
                if let Some(timeout) = self.options.timeout {
                    self.expire(State::Timeout, timeout);
                }
                self.abort(context, &pipeline);
            }
        }

        context.add_phase_time(Phase::Run, started.elapsed());
        self.mark_completion();
        let timings = pipeline.teardown();
        let state = self.state();
        self.write_suffix(state, Some(context.phases()), Some(&timings));
        self.writer.no_more_data();
        debug!("request {} finished: {}", self.id, state);
    }

    fn expire(&self, state: State, timeout: Duration) {
        self.error(QueryError::Timeout(timeout));
        self.set_state(state);
        self.stop_execute.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::transport::RecordingTransport;
    use serde_json::json;

    fn request(options: RequestOptions) -> (RecordingTransport, Request) {
        let transport = RecordingTransport::new();
        let request = Request::new(
            Arc::new(ServerSettings::new()),
            options,
            Box::new(transport.clone()),
        );
        (transport, request)
    }

    #[test]
    fn test_result_accounting() {
        let (_, request) = request(RequestOptions::default());
        let item = Item::new(json!({"a": 1}));
        let size = serde_json::to_vec(item.value()).unwrap().len() as u64;

        assert!(request.result(&item));
        assert_eq!(request.result_count(), 1);
        assert_eq!(request.result_size(), size);

        request.set_state(State::Stopped);
        assert!(!request.result(&item));
        assert_eq!(request.result_count(), 1);
        assert_eq!(request.result_size(), size);
    }

    #[test]
    fn test_state_transitions() {
        let (_, request) = request(RequestOptions::default());
        request.set_state(State::Closed);
        request.set_state(State::Completed);
        request.set_state(State::Stopped);
        assert_eq!(request.state(), State::Closed);

        request.set_state(State::Fatal);
        request.set_state(State::Running);
        assert_eq!(request.state(), State::Fatal);
    }

    #[test]
    fn test_once_only_warnings_dedup() {
        let (_, request) = request(RequestOptions::default());
        request.warning(QueryError::ChunkedScan);
        request.warning(QueryError::ChunkedScan);
        request.warning(QueryError::Internal("x".into()));
        request.warning(QueryError::Internal("x".into()));
        assert_eq!(request.warnings().len(), 3);
    }

    #[test]
    fn test_fail_sets_status_before_header() {
        let (transport, request) = request(RequestOptions::default());
        request.fail(QueryError::Plan("no such keyspace".into()));
        request.failed();

        assert_eq!(transport.status(), Some(404));
        let doc = transport.document().unwrap();
        assert_eq!(doc["status"], "fatal");
        assert_eq!(doc["errors"][0]["code"], 4000);
        assert_eq!(doc["requestID"], request.id());
        assert!(doc.get("results").is_none());
    }

    #[test]
    fn test_expire_records_timeout() {
        let (_, request) = request(RequestOptions::default());
        request.expire(State::Timeout, Duration::from_millis(250));
        assert_eq!(request.state(), State::Timeout);
        assert_eq!(request.errors(), vec![QueryError::Timeout(Duration::from_millis(250))]);
        assert!(request.stop_execute.is_fired());
    }
}
