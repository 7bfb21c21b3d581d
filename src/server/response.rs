// Response document
//
// Rendering of the JSON envelope around the streamed results:
//
//   {
//     "requestID": ..., "clientContextID": ..., "signature": ...,
//     "results": [ ...streamed... ],
//     "errors": [...], "warnings": [...], "status": ...,
//     "metrics": {...}, "profile": {...}, "controls": {...}
//   }
//
// Every writer returns false once the transport refuses more data; callers
// stop at the first refusal.

use std::sync::atomic::Ordering;

use serde::Serialize;
use serde_json::Value;

use crate::common::{format_duration, json};
use crate::query::executor::output::State;
use crate::query::executor::phase::PhaseTable;
use crate::query::executor::result::{QueryError, map_error_to_http_status};
use crate::server::request::Request;
use crate::server::settings::Profile;

impl Request {
    /// Everything up to and including the opening bracket of `results`
    pub(super) fn write_prefix(&self, signature: Option<&Value>) -> bool {
        self.writer.write_str("{\n")
            && self.write_request_id()
            && self.write_client_context_id()
            && self.write_signature(signature)
            && self.writer.write_str(",\n")
            && self.writer.write_str(&self.prefix)
            && self.writer.write_str("\"results\": [")
    }

    /// Close `results` and write the rest of the document. A fatal request
    /// only reports its errors, warnings and status.
    pub(super) fn write_suffix(
        &self,
        state: State,
        phases: Option<&PhaseTable>,
        timings: Option<&Value>,
    ) -> bool {
        self.writer.write_str("\n")
            && self.writer.write_str(&self.prefix)
            && self.writer.write_str("]")
            && self.write_closing(state, state != State::Fatal, phases, timings)
    }

    pub(super) fn write_request_id(&self) -> bool {
        self.writer.write_str(&self.prefix)
            && self.writer.write_str("\"requestID\": ")
            && self.writer.write_str(&Value::String(self.id.clone()).to_string())
    }

    pub(super) fn write_client_context_id(&self) -> bool {
        match &self.options.client_context_id {
            Some(id) => self.write_field("clientContextID", &Value::String(id.clone()).to_string()),
            None => true,
        }
    }

    fn write_signature(&self, signature: Option<&Value>) -> bool {
        if !self.options.signature(&self.settings) {
            return true;
        }
        match signature {
            Some(signature) => match self.render(signature) {
                Some(rendered) => self.write_field("signature", &rendered),
                None => true,
            },
            None => self.write_field("signature", "null"),
        }
    }

    pub(super) fn write_closing(
        &self,
        state: State,
        full: bool,
        phases: Option<&PhaseTable>,
        timings: Option<&Value>,
    ) -> bool {
        let Some(error_count) = self.write_errors(state) else {
            return false;
        };
        let Some(warning_count) = self.write_warnings() else {
            return false;
        };
        if !self.write_state(state, error_count) {
            return false;
        }
        if full
            && !(self.write_metrics(error_count, warning_count)
                && self.write_profile(phases, timings)
                && self.write_controls())
        {
            return false;
        }
        self.writer.write_str("\n}\n")
    }

    /// The first error decides the HTTP status unless the request already
    /// failed fatally. Returns the number of errors written.
    fn write_errors(&self, state: State) -> Option<usize> {
        let errors = self.errors();
        if errors.is_empty() {
            return Some(0);
        }
        if state != State::Fatal {
            self.writer.set_status(map_error_to_http_status(&errors[0], 200));
        }
        self.write_messages("errors", &errors)
    }

    fn write_warnings(&self) -> Option<usize> {
        let warnings = self.warnings();
        if warnings.is_empty() {
            return Some(0);
        }
        self.write_messages("warnings", &warnings)
    }

    fn write_messages(&self, name: &str, messages: &[QueryError]) -> Option<usize> {
        let new_prefix = self.nested_prefix();
        if !self.writer.write_str(",\n")
            || !self.writer.write_str(&self.prefix)
            || !self.writer.write_str(&format!("\"{}\": [", name))
        {
            return None;
        }
        for (count, message) in messages.iter().enumerate() {
            let rendered = json::to_string(&message.to_json(), &new_prefix, &self.indent).ok()?;
            let written = (count == 0 || self.writer.write_str(","))
                && (self.prefix.is_empty() || self.writer.write_str("\n"))
                && self.writer.write_str(&new_prefix)
                && self.writer.write_str(&rendered);
            if !written {
                return None;
            }
        }
        let closed = (self.prefix.is_empty()
            || (self.writer.write_str("\n") && self.writer.write_str(&self.prefix)))
            && self.writer.write_str("]");
        closed.then_some(messages.len())
    }

    fn write_state(&self, state: State, error_count: usize) -> bool {
        let state = match state {
            State::Completed if error_count == 0 => State::Success,
            State::Completed => State::Errors,
            other => other,
        };
        self.write_field("status", &format!("\"{}\"", state))
    }

    fn write_metrics(&self, error_count: usize, warning_count: usize) -> bool {
        if !self.options.metrics(&self.settings) {
            return true;
        }
        let (elapsed, execution) = *self.completion.lock();
        let mut members = vec![
            ("elapsedTime", format!("\"{}\"", format_duration(elapsed))),
            ("executionTime", format!("\"{}\"", format_duration(execution))),
            ("resultCount", self.result_count.load(Ordering::Acquire).to_string()),
            ("resultSize", self.result_size.load(Ordering::Acquire).to_string()),
        ];
        let optional = [
            ("mutationCount", self.mutation_count.load(Ordering::Acquire)),
            ("sortCount", self.sort_count.load(Ordering::Acquire)),
            ("errorCount", error_count as u64),
            ("warningCount", warning_count as u64),
        ];
        for (name, count) in optional {
            if count > 0 {
                members.push((name, count.to_string()));
            }
        }
        self.write_object("metrics", &members)
    }

    fn write_profile(&self, phases: Option<&PhaseTable>, timings: Option<&Value>) -> bool {
        let profile = self.options.profile(&self.settings);
        if profile == Profile::Off {
            return true;
        }
        let new_prefix = self.nested_prefix();
        let mut members = Vec::new();
        if let Some(phases) = phases {
            if let Some(times) = phases.fmt_times().and_then(|t| self.render_at(&t, &new_prefix)) {
                members.push(("phaseTimes", times));
            }
            if let Some(counts) = phases.fmt_counts().and_then(|c| self.render_at(&c, &new_prefix)) {
                members.push(("phaseCounts", counts));
            }
            if let Some(ops) = phases.fmt_operators().and_then(|o| self.render_at(&o, &new_prefix)) {
                members.push(("phaseOperators", ops));
            }
        }
        if profile == Profile::Timings {
            if let Some(timings) = timings.and_then(|t| self.render_at(t, &new_prefix)) {
                members.push(("executionTimings", timings));
            }
        }
        if members.is_empty() {
            return true;
        }
        self.write_object("profile", &members)
    }

    fn write_controls(&self) -> bool {
        if !self.options.controls(&self.settings) {
            return true;
        }
        let new_prefix = self.nested_prefix();
        let mut members = Vec::new();
        if !self.options.named_args.is_empty() {
            if let Some(args) = self.render_at(&self.options.named_args, &new_prefix) {
                members.push(("namedArgs", args));
            }
        }
        if !self.options.positional_args.is_empty() {
            if let Some(args) = self.render_at(&self.options.positional_args, &new_prefix) {
                members.push(("positionalArgs", args));
            }
        }
        if members.is_empty() {
            return true;
        }
        self.write_object("controls", &members)
    }

    /// Top level member whose value is an object of pre-rendered members
    fn write_object(&self, name: &str, members: &[(&str, String)]) -> bool {
        let new_prefix = self.nested_prefix();
        let mut out = format!(",\n{}\"{}\": {{", self.prefix, name);
        for (count, (member, value)) in members.iter().enumerate() {
            if count > 0 {
                out.push(',');
            }
            if !self.prefix.is_empty() {
                out.push('\n');
            }
            out.push_str(&new_prefix);
            out.push_str(&format!("\"{}\": {}", member, value));
        }
        if !self.prefix.is_empty() {
            out.push('\n');
            out.push_str(&self.prefix);
        }
        out.push('}');
        self.writer.write_str(&out)
    }

    /// Top level member with a pre-rendered value
    fn write_field(&self, name: &str, rendered: &str) -> bool {
        self.writer.write_str(",\n")
            && self.writer.write_str(&self.prefix)
            && self.writer.write_str(&format!("\"{}\": ", name))
            && self.writer.write_str(rendered)
    }

    fn nested_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.indent)
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> Option<String> {
        self.render_at(value, &self.prefix)
    }

    fn render_at<T: Serialize + ?Sized>(&self, value: &T, prefix: &str) -> Option<String> {
        json::to_string(value, prefix, &self.indent).ok()
    }
}
