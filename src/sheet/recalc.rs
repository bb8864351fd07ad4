//! Recalculation passes.
//!
//! A pass walks the resolved generations in order. Static nodes refresh on
//! the calling thread; every other node becomes a [`CalcJob`] whose result
//! is routed back through a per-pass inbox and applied by
//! [`Sheet::handle_calc_result`]. The pass waits on each generation before
//! starting the next and stops at the first node that does not succeed.
//! Results already applied are kept.

use super::function::CalcContext;
use super::resolver::Generation;
use super::{Sheet, SheetError};
use crate::backend::{CalcJob, CalcJobResult};
use crate::id::NodeId;
use crate::types::{CalcStatus, NodeKind, SheetVariant, Value};
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Summary of one recalculation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub generations: Vec<Generation>,
    pub status: CalcStatus,
    pub message: String,
    pub duration: Duration,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.status == CalcStatus::Success
    }
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100_000.0).round() / 100.0
}

impl Sheet {
    /// Recalculates every connected node on the sheet.
    pub fn recalc_all(&mut self, ctx: &mut CalcContext<'_>) -> PassReport {
        let all: Vec<NodeId> = self.nodes.iter().map(|node| node.id).collect();
        match self.dependency_generations(&all, ctx.config.log_dependency_graphs) {
            Ok(generations) => self.process(generations, ctx),
            Err(err) => self.fail_pass(err, Instant::now()),
        }
    }

    /// Recalculates dirty nodes and everything they read from.
    ///
    /// Returns `None` when nothing is dirty.
    pub fn recalc_changed(&mut self, ctx: &mut CalcContext<'_>) -> Option<PassReport> {
        match self.find_changed(ctx.config.log_dependency_graphs) {
            Ok(generations) if generations.first().map_or(true, BTreeSet::is_empty) => None,
            Ok(generations) => Some(self.process(generations, ctx)),
            Err(err) => Some(self.fail_pass(err, Instant::now())),
        }
    }

    /// Timer-driven recalculation for top-level sheets.
    ///
    /// Runs only when auto recalculation is enabled, the interval since the
    /// last pass has elapsed and something is dirty.
    pub fn recalc_auto(&mut self, ctx: &mut CalcContext<'_>, now: Instant) -> Option<PassReport> {
        if self.variant != SheetVariant::Sheet || !ctx.config.auto_recalc {
            return None;
        }
        if let Some(last) = self.last_recalc {
            if now.saturating_duration_since(last) < ctx.config.auto_recalc_interval() {
                return None;
            }
        }
        let generations = match self.find_changed(ctx.config.log_dependency_graphs) {
            Ok(generations) => generations,
            Err(err) => return Some(self.fail_pass(err, now)),
        };
        if generations.first().map_or(true, BTreeSet::is_empty) {
            return None;
        }
        if ctx.config.auto_recalc_log {
            tracing::info!("Auto-recalculating due to changes");
        }
        Some(self.process(generations, ctx))
    }

    fn fail_pass(&mut self, err: SheetError, now: Instant) -> PassReport {
        self.last_recalc = Some(now);
        let message = format!("Error processing nodes: {}", err);
        tracing::error!("Exception while processing nodes: {}", err);
        self.set_status(CalcStatus::Error, message.clone());
        PassReport {
            generations: Vec::new(),
            status: CalcStatus::Error,
            message,
            duration: Duration::ZERO,
        }
    }

    /// Processes `generations` in order, waiting on each before the next.
    pub fn process(&mut self, generations: Vec<Generation>, ctx: &mut CalcContext<'_>) -> PassReport {
        let start = Instant::now();
        self.last_recalc = Some(start);
        self.set_status(CalcStatus::Processing, "Processing nodes...");

        let (sender, inbox) = crossbeam_channel::unbounded();
        let outcome = self.run_generations(&generations, ctx, &sender, &inbox);
        let duration = start.elapsed();

        let (status, message) = match outcome {
            Ok(true) => (
                CalcStatus::Success,
                format!("Node processing took {}ms", millis(duration)),
            ),
            Ok(false) => (
                CalcStatus::Error,
                format!("Node processing failed after {}ms!", millis(duration)),
            ),
            Err(err) => {
                tracing::error!("Exception while processing nodes: {}", err);
                (CalcStatus::Error, format!("Error processing nodes: {}", err))
            }
        };
        self.set_status(status, message.clone());
        PassReport {
            generations,
            status,
            message,
            duration,
        }
    }

    /// `Ok(false)` when a node failed or timed out.
    fn run_generations(
        &mut self,
        generations: &[Generation],
        ctx: &mut CalcContext<'_>,
        sender: &Sender<CalcJobResult>,
        inbox: &Receiver<CalcJobResult>,
    ) -> Result<bool, SheetError> {
        let mut processed: BTreeSet<NodeId> = BTreeSet::new();

        for generation in generations {
            for node_id in generation {
                if processed.contains(node_id) {
                    return Err(SheetError::CircularDependency(*node_id));
                }
                let node = self
                    .find_node(*node_id)
                    .ok_or(SheetError::NodeNotFound(*node_id))?;
                if node.kind() == NodeKind::Static {
                    self.refresh_static(*node_id)?;
                } else {
                    let job = CalcJob::for_node(node);
                    let sender = sender.clone();
                    ctx.backend.submit(
                        job,
                        Box::new(move |result| {
                            // the pass may be over; late results are dropped
                            let _ = sender.send(result);
                        }),
                    );
                    processed.insert(*node_id);
                    if let Some(node) = self.find_node_mut(*node_id) {
                        node.set_calc_status(CalcStatus::Processing, "", "");
                    }
                }
            }

            for node_id in generation {
                if !self.wait_for_node(*node_id, ctx, inbox) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn refresh_static(&mut self, node_id: NodeId) -> Result<(), SheetError> {
        let node = self
            .find_node(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        let started = Instant::now();
        let refreshed = match node.registration().refresh {
            Some(refresh) => refresh(node.config.get(), node.common_config.get()),
            None => Ok(node.output_values()),
        };
        match refreshed {
            Ok(outputs) => {
                self.update_outputs(node_id, &outputs)?;
                if let Some(node) = self.find_node_mut(node_id) {
                    node.set_calc_status(CalcStatus::Success, "", "");
                    node.calc_time = Some(started.elapsed());
                    node.mark_unchanged();
                }
            }
            Err(err) => {
                tracing::error!("Error refreshing node id: {}: {}", node_id, err);
                if let Some(node) = self.find_node_mut(node_id) {
                    node.set_calc_status(CalcStatus::Error, err.to_string(), "");
                }
            }
        }
        Ok(())
    }

    /// Polls until `node_id` leaves `Processing`; true if it succeeded.
    fn wait_for_node(
        &mut self,
        node_id: NodeId,
        ctx: &mut CalcContext<'_>,
        inbox: &Receiver<CalcJobResult>,
    ) -> bool {
        let timeout = ctx.config.calc_timeout();
        let delay = ctx.config.calc_check_delay();
        let waiting_since = Instant::now();

        self.pump_results(ctx, inbox);
        while self.node_status(node_id) == CalcStatus::Processing {
            if waiting_since.elapsed() > timeout {
                let message = SheetError::TimedOut(timeout.as_secs_f64()).to_string();
                tracing::error!("Timed out waiting for calc jobs!");
                if let Some(node) = self.find_node_mut(node_id) {
                    node.set_calc_status(CalcStatus::TimedOut, message, "");
                }
                break;
            }
            std::thread::sleep(delay);
            self.pump_results(ctx, inbox);
        }
        self.node_status(node_id) == CalcStatus::Success
    }

    fn node_status(&self, node_id: NodeId) -> CalcStatus {
        self.find_node(node_id)
            .map(|node| node.status())
            .unwrap_or(CalcStatus::Error)
    }

    fn pump_results(&mut self, ctx: &mut CalcContext<'_>, inbox: &Receiver<CalcJobResult>) {
        ctx.backend.check();
        while let Ok(result) = inbox.try_recv() {
            self.handle_calc_result(result, ctx);
        }
    }

    /// Applies a job result to its node.
    ///
    /// Results for nodes that are gone or no longer `Processing` (timed out,
    /// or from an earlier pass) are ignored.
    pub fn handle_calc_result(&mut self, result: CalcJobResult, ctx: &mut CalcContext<'_>) {
        let Some(node) = self.find_node_mut(result.node_id) else {
            tracing::warn!(
                "Ignoring result of job {} for unknown node id: {}",
                result.job_id,
                result.node_id
            );
            return;
        };
        if node.status() != CalcStatus::Processing {
            tracing::debug!(
                "Ignoring late result of job {} for node id: {} ({})",
                result.job_id,
                result.node_id,
                node.status()
            );
            return;
        }

        if result.error {
            tracing::error!(
                "Error while processing job: {} for node id: {}: {}",
                result.job_id,
                result.node_id,
                result.error_message
            );
            if ctx.config.log_error_tracebacks && !result.error_traceback.is_empty() {
                tracing::error!("{}", result.error_traceback);
            }
            node.set_calc_status(
                CalcStatus::Error,
                result.error_message,
                result.error_traceback,
            );
            return;
        }

        let special = node.registration().special;
        if special.is_none() && result.outputs.len() != node.outputs.len() {
            let message = format!(
                "Expected {} outputs, got {}",
                node.outputs.len(),
                result.outputs.len()
            );
            tracing::error!(
                "Error while processing job: {} for node id: {}: {}",
                result.job_id,
                result.node_id,
                message
            );
            node.set_calc_status(CalcStatus::Error, message, "");
            return;
        }

        let node_id = result.node_id;
        let applied = self.update_outputs(node_id, &result.outputs).and_then(|_| match special {
            Some(role) => {
                tracing::debug!("Handling special_execute for node id: {}", node_id);
                self.special_execute(node_id, role, ctx)
            }
            None => Ok(()),
        });

        if let Some(node) = self.find_node_mut(node_id) {
            match applied {
                Ok(()) => {
                    node.set_calc_status(CalcStatus::Success, "", "");
                    node.calc_time = Some(result.duration());
                    node.mark_unchanged();
                }
                Err(err) => {
                    tracing::error!("Error while finishing node id: {}: {}", node_id, err);
                    node.set_calc_status(CalcStatus::Error, err.to_string(), "");
                }
            }
        }
    }

    /// Sets a node's output values and pushes them onto linked inputs.
    pub fn update_outputs(&mut self, node_id: NodeId, outputs: &[Value]) -> Result<(), SheetError> {
        let node = self
            .find_node_mut(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        let mut published = Vec::with_capacity(outputs.len());
        for (pin, value) in node.outputs.iter_mut().zip(outputs) {
            pin.value = value.clone();
            published.push((pin.id, value));
        }

        let targets: Vec<_> = published
            .iter()
            .flat_map(|(pin_id, value)| {
                self.links
                    .iter()
                    .filter(move |link| link.output_id == *pin_id)
                    .map(move |link| (link.input_node_id, link.input_id, *value))
            })
            .collect();
        for (target_node, input_id, value) in targets {
            if let Some(pin) = self
                .find_node_mut(target_node)
                .and_then(|node| node.find_pin_mut(input_id))
            {
                pin.value = value.clone();
            }
        }
        Ok(())
    }

    /// Marks everything downstream of a dirty node dirty as well.
    pub fn propagate_changed(&mut self) {
        let changed = self.changed_nodes();
        if changed.is_empty() {
            return;
        }
        for node_id in self.build_affected_list(&changed) {
            match self.find_node_mut(node_id) {
                Some(node) => node.mark_changed(),
                None => tracing::warn!("Skipping propagation for invalid node id: {}", node_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CalcBackend, InlineBackend, MockCalcBackend};
    use crate::config::AppConfig;
    use crate::id::{IdProviders, JobId};
    use crate::types::PinDirection;

    struct Fixture {
        ids: IdProviders,
        sheet: Sheet,
        config: AppConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ids = IdProviders::new();
            let sheet = Sheet::new(SheetVariant::Sheet, ids.next_sheet(), "Test");
            Self {
                ids,
                sheet,
                config: AppConfig::default(),
            }
        }

        fn add(&mut self, class: &str) -> NodeId {
            self.sheet.new_node(class, &mut self.ids).unwrap()
        }

        fn link(&mut self, from: NodeId, from_idx: usize, to: NodeId, to_idx: usize) {
            let out = self.sheet.find_node(from).unwrap().outputs[from_idx].id;
            let input = self.sheet.find_node(to).unwrap().inputs[to_idx].id;
            self.sheet.attempt_link(out, input, &mut self.ids).unwrap();
        }

        fn value_of(&self, node: NodeId, direction: PinDirection, idx: usize) -> Value {
            self.sheet.find_node(node).unwrap().pins(direction)[idx].value.clone()
        }
    }

    /// A -> Add(B=3) -> View
    fn add_chain(fx: &mut Fixture) -> (NodeId, NodeId, NodeId) {
        let a = fx.add("ValueNumber");
        let b = fx.add("MathAdd");
        let c = fx.add("View");
        fx.sheet.set_node_config(a, "value", 5i64).unwrap();
        let b_in = fx.sheet.find_node(b).unwrap().inputs[1].id;
        fx.sheet.set_input_value(b_in, 3i64).unwrap();
        fx.link(a, 0, b, 0);
        fx.link(b, 0, c, 0);
        (a, b, c)
    }

    #[test]
    fn test_recalc_all_runs_generations_in_order() {
        let mut fx = Fixture::new();
        let (a, b, c) = add_chain(&mut fx);
        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);
        let report = fx.sheet.recalc_all(&mut ctx);

        assert!(report.is_success(), "{}", report.message);
        let expected: Vec<Generation> = vec![[a].into(), [b].into(), [c].into()];
        assert_eq!(report.generations, expected);
        assert_eq!(fx.value_of(b, PinDirection::Output, 0), Value::Int(8));
        assert_eq!(fx.value_of(c, PinDirection::Input, 0), Value::Int(8));
        assert_eq!(fx.sheet.status(), CalcStatus::Success);
        assert!(fx.sheet.message().starts_with("Node processing took "));
        assert!(fx.sheet.changed_nodes().is_empty());
    }

    #[test]
    fn test_unlinked_nodes_produce_no_work() {
        let mut fx = Fixture::new();
        for class in ["ValueNumber", "MathAdd", "View"] {
            fx.add(class);
        }
        let all: Vec<NodeId> = fx.sheet.nodes().iter().map(|n| n.id).collect();
        assert!(fx.sheet.build_dependency_graph(&all).unwrap().is_empty());
    }

    #[test]
    fn test_divide_by_zero_stops_pass() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let div = fx.add("MathDivide");
        let view = fx.add("View");
        fx.link(a, 0, div, 0);
        fx.link(div, 0, view, 0);
        let divisor = fx.sheet.find_node(div).unwrap().inputs[1].id;
        fx.sheet.set_input_value(divisor, 0i64).unwrap();

        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);
        let report = fx.sheet.recalc_all(&mut ctx);

        assert_eq!(report.status, CalcStatus::Error);
        assert!(report.message.starts_with("Node processing failed after "));
        let node = fx.sheet.find_node(div).unwrap();
        assert_eq!(node.status(), CalcStatus::Error);
        assert_eq!(node.message(), "Cannot divide by 0!");
        // the static node's result is kept, the view never ran
        assert_eq!(fx.sheet.find_node(a).unwrap().status(), CalcStatus::Success);
        assert_eq!(fx.sheet.find_node(view).unwrap().status(), CalcStatus::Idle);
    }

    #[test]
    fn test_timeout_marks_node() {
        let mut fx = Fixture::new();
        let (_, b, c) = add_chain(&mut fx);
        fx.config.calc_timeout_secs = 0.02;

        let mut backend = MockCalcBackend::new();
        backend.expect_submit().returning(|_, _| JobId(10));
        backend.expect_check().returning(|| 0);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);
        let report = fx.sheet.recalc_all(&mut ctx);

        assert_eq!(report.status, CalcStatus::Error);
        let node = fx.sheet.find_node(b).unwrap();
        assert_eq!(node.status(), CalcStatus::TimedOut);
        assert_eq!(node.message(), "Timed out after 0.02s waiting for calc jobs!");
        assert_eq!(fx.sheet.find_node(c).unwrap().status(), CalcStatus::Idle);
    }

    #[test]
    fn test_late_result_is_ignored() {
        let mut fx = Fixture::new();
        let (_, b, _) = add_chain(&mut fx);
        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);

        let job = CalcJob::for_node(fx.sheet.find_node(b).unwrap());
        let late = CalcJobResult::success(&job, vec![Value::Int(99)], Duration::ZERO);
        fx.sheet
            .find_node_mut(b)
            .unwrap()
            .set_calc_status(CalcStatus::TimedOut, "", "");
        fx.sheet.handle_calc_result(late, &mut ctx);
        assert_eq!(fx.sheet.find_node(b).unwrap().status(), CalcStatus::TimedOut);
        assert!(fx.value_of(b, PinDirection::Output, 0).is_null());
    }

    #[test]
    fn test_error_result_sets_message_and_traceback() {
        let mut fx = Fixture::new();
        let (_, b, _) = add_chain(&mut fx);
        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);

        let job = CalcJob::for_node(fx.sheet.find_node(b).unwrap());
        let failed = CalcJobResult::failure(&job, "bad", "line 1", Duration::ZERO);
        fx.sheet
            .find_node_mut(b)
            .unwrap()
            .set_calc_status(CalcStatus::Processing, "", "");
        fx.sheet.handle_calc_result(failed, &mut ctx);
        let node = fx.sheet.find_node(b).unwrap();
        assert_eq!(node.status(), CalcStatus::Error);
        assert_eq!(node.message(), "bad");
        assert_eq!(node.traceback(), "line 1");
    }

    #[test]
    fn test_propagate_and_recalc_changed() {
        let mut fx = Fixture::new();
        let (a, b, c) = add_chain(&mut fx);
        let mut backend = InlineBackend::new(&fx.config.script);
        {
            let mut ctx = CalcContext::new(&mut backend, &fx.config);
            assert!(fx.sheet.recalc_all(&mut ctx).is_success());
        }
        assert!(fx.sheet.changed_nodes().is_empty());

        fx.sheet.set_node_config(a, "value", 10i64).unwrap();
        fx.sheet.propagate_changed();
        assert_eq!(fx.sheet.changed_nodes(), vec![a, b, c]);

        let mut ctx = CalcContext::new(&mut backend, &fx.config);
        let report = fx.sheet.recalc_changed(&mut ctx).unwrap();
        assert!(report.is_success());
        assert_eq!(fx.value_of(c, PinDirection::Input, 0), Value::Int(13));
        assert!(fx.sheet.recalc_changed(&mut ctx).is_none());
    }

    #[test]
    fn test_recalc_auto_respects_interval_and_variant() {
        let mut fx = Fixture::new();
        let (_, _, c) = add_chain(&mut fx);
        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);

        let now = Instant::now();
        assert!(fx.sheet.recalc_auto(&mut ctx, now).is_some());
        assert_eq!(fx.value_of(c, PinDirection::Input, 0), Value::Int(8));

        fx.sheet.find_node_mut(c).unwrap().mark_changed();
        // interval has not elapsed yet
        assert!(fx.sheet.recalc_auto(&mut ctx, Instant::now()).is_none());
        let later = Instant::now() + Duration::from_secs(1);
        assert!(fx.sheet.recalc_auto(&mut ctx, later).is_some());

        fx.sheet.variant = SheetVariant::Function;
        fx.sheet.find_node_mut(c).unwrap().mark_changed();
        let much_later = later + Duration::from_secs(1);
        assert!(fx.sheet.recalc_auto(&mut ctx, much_later).is_none());
    }

    #[test]
    fn test_static_refresh_failure() {
        let mut fx = Fixture::new();
        let table = fx.add("ValueTable");
        let view = fx.add("View");
        fx.link(table, 0, view, 0);
        fx.sheet.set_node_config(table, "load_from_file", true).unwrap();
        fx.sheet
            .set_node_config(table, "file_path", "/nowhere/at/all.csv")
            .unwrap();

        let mut backend = InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(&mut backend, &fx.config);
        let report = fx.sheet.recalc_all(&mut ctx);
        assert_eq!(report.status, CalcStatus::Error);
        assert_eq!(
            fx.sheet.find_node(table).unwrap().message(),
            "Configured file path not found: /nowhere/at/all.csv"
        );
    }

    #[test]
    fn test_submit_goes_through_backend_seam() {
        let mut fx = Fixture::new();
        let (_, b, _) = add_chain(&mut fx);
        let backend: &mut dyn CalcBackend = &mut InlineBackend::new(&fx.config.script);
        let mut ctx = CalcContext::new(backend, &fx.config);
        assert!(fx.sheet.recalc_all(&mut ctx).is_success());
        assert!(fx.sheet.find_node(b).unwrap().calc_time.is_some());
    }
}
