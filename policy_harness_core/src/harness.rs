//! One fuzz iteration: decode, classify, drive the plugin, reset.

use crate::classifier::{CategoryCounts, Collections};
use crate::config::HarnessConfig;
use crate::context::{PolicyContext, ResetReport};
use crate::decoder::InputDecoder;
use crate::driver::{LifecycleDriver, LifecycleOutcome};
use crate::plugin::{CheckStatus, OpenStatus, PolicyPlugin};
use crate::relay::StdioRelay;
use std::rc::Rc;
use tracing::{debug, warn};

/// How far an iteration got before reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The plugin was driven through its lifecycle.
    Driven,
    /// The input stream could not be opened; no plugin call was made.
    InputUnavailable,
    /// A collection could not be built; no plugin call was made.
    CollectionsIncomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub disposition: Disposition,
    pub counts: CategoryCounts,
    pub open: Option<OpenStatus>,
    pub check: Option<CheckStatus>,
    pub default_command_used: bool,
    pub closed: bool,
    pub reset: ResetReport,
}

impl IterationReport {
    fn abandoned(disposition: Disposition) -> Self {
        Self {
            disposition,
            counts: CategoryCounts::default(),
            open: None,
            check: None,
            default_command_used: false,
            closed: false,
            reset: ResetReport::default(),
        }
    }
}

/// Owns a plugin and the process-wide state it mutates, and runs inputs
/// through it one at a time.
pub struct Harness<P: PolicyPlugin> {
    plugin: P,
    decoder: InputDecoder,
    driver: LifecycleDriver,
    context: PolicyContext,
    entry_limit: Option<usize>,
}

impl<P: PolicyPlugin> Harness<P> {
    /// Relays conversation and printf output to the process's stdout and stderr.
    pub fn new(plugin: P, config: &HarnessConfig) -> Self {
        Self::with_relay(plugin, config, Rc::new(StdioRelay::stdio()))
    }

    pub fn with_relay(plugin: P, config: &HarnessConfig, relay: Rc<StdioRelay>) -> Self {
        let driver = LifecycleDriver::new(config.driver.clone(), relay.clone(), relay);
        let decoder =
            InputDecoder::new(config.input.backing).with_temp_dir(config.input.temp_dir.clone());
        Self::with_parts(plugin, decoder, driver, PolicyContext::default())
            .with_entry_limit(config.input.max_entries)
    }

    pub fn with_parts(
        plugin: P,
        decoder: InputDecoder,
        driver: LifecycleDriver,
        context: PolicyContext,
    ) -> Self {
        Self {
            plugin,
            decoder,
            driver,
            context,
            entry_limit: None,
        }
    }

    /// Caps how many entries any one collection may hold per iteration.
    pub fn with_entry_limit(mut self, limit: Option<usize>) -> Self {
        self.entry_limit = limit;
        self
    }

    pub fn context(&self) -> &PolicyContext {
        &self.context
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }

    pub fn into_plugin(self) -> P {
        self.plugin
    }

    /// Runs `data` through one full iteration. The context is clean again on return.
    pub fn run_one(&mut self, data: &[u8]) -> IterationReport {
        if !self.context.is_clean() {
            warn!("policy context dirty before iteration, resetting");
            self.context.reset();
        }

        let lines = match self.decoder.decode(data) {
            Ok(lines) => lines,
            Err(e) => {
                debug!(error = %e, "input stream unavailable, abandoning iteration");
                let mut report = IterationReport::abandoned(Disposition::InputUnavailable);
                report.reset = self.context.reset();
                return report;
            }
        };

        let mut collections = match Collections::from_lines_limited(lines, self.entry_limit) {
            Ok(collections) => collections,
            Err(e) => {
                debug!(error = %e, "could not build collections, abandoning iteration");
                let mut report = IterationReport::abandoned(Disposition::CollectionsIncomplete);
                report.reset = self.context.reset();
                return report;
            }
        };
        let counts = collections.counts();

        let outcome = self
            .driver
            .drive(&mut self.plugin, &mut self.context, &mut collections);
        let LifecycleOutcome {
            open,
            check,
            closed,
            ..
        } = outcome;

        let mut reset = self.context.reset();
        let (check_status, default_command_used) = match check {
            Some(result) => {
                reset.outputs_dropped = result.output.entry_count();
                drop(result.output);
                (Some(result.status), result.default_command_used)
            }
            None => (None, false),
        };
        reset.arrays_released = collections.release();
        debug!(?reset, "iteration reset");

        IterationReport {
            disposition: Disposition::Driven,
            counts,
            open: Some(open),
            check: check_status,
            default_command_used,
            closed,
            reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::InputBacking;
    use crate::driver::DriverSettings;
    use crate::testing::RecordingPlugin;
    use pretty_assertions::assert_eq;
    use std::ffi::CString;

    fn harness(plugin: RecordingPlugin) -> Harness<RecordingPlugin> {
        let relay = Rc::new(StdioRelay::with_writers(std::io::sink(), std::io::sink()));
        let driver = LifecycleDriver::new(DriverSettings::default(), relay.clone(), relay)
            .with_environ(vec![CString::new("PATH=/usr/bin").unwrap()]);
        Harness::with_parts(
            plugin,
            InputDecoder::new(InputBacking::InMemory),
            driver,
            PolicyContext::default(),
        )
    }

    #[test]
    fn driven_iteration_leaves_context_clean() {
        let mut h = harness(RecordingPlugin::new().populating_user());
        let report = h.run_one(b"user=alice\nuid=1000\nargv=/bin/ls\nargv=-l\nenv=A=1\n");

        assert_eq!(report.disposition, Disposition::Driven);
        assert_eq!(report.open, Some(OpenStatus::Success));
        assert_eq!(report.check, Some(CheckStatus::Allowed));
        assert!(report.closed);
        assert_eq!(report.reset.handles_released, 4);
        assert!(report.reset.strings_freed >= 2);
        assert_eq!(report.reset.env_entries_cleared, 1);
        assert_eq!(report.reset.outputs_dropped, 1 + 2 + 1);
        assert_eq!(report.reset.arrays_released, 4);
        assert!(h.context().is_clean());
        assert!(h.context().identities.is_empty());
    }

    #[test]
    fn fatal_open_still_resets() {
        let mut h = harness(RecordingPlugin::new().populating_user().open_returning(-1));
        let report = h.run_one(b"user=bob\nuid=7\n");

        assert_eq!(report.open, Some(OpenStatus::Fatal(-1)));
        assert_eq!(report.check, None);
        assert!(!report.closed);
        assert_eq!(report.reset.handles_released, 4);
        assert_eq!(report.reset.outputs_dropped, 0);
        assert!(h.context().is_clean());
    }

    #[test]
    fn counts_reflect_classification() {
        let mut h = harness(RecordingPlugin::new());
        let report = h.run_one(b"# comment\n\nfoo=bar\nsudoers_uid=0\nargv=/bin/ls\n");
        assert_eq!(report.counts.settings, 1);
        assert_eq!(report.counts.plugin_args, 1);
        assert_eq!(report.counts.argv, 1);
        assert_eq!(report.counts.discarded, 2);
        assert!(!report.default_command_used);
    }

    #[test]
    fn dirty_context_is_reset_before_running() {
        let mut h = harness(RecordingPlugin::new());
        h.context.user.name = Some("leftover".into());
        h.context.env.set("X", "1");
        h.run_one(b"");
        assert!(h.context().is_clean());
    }

    #[test]
    fn repeated_runs_are_identical() {
        let mut h = harness(RecordingPlugin::new().populating_user());
        let input = b"user=carol\nuid=42\ncwd=/tmp\nhost=box.example.org\n";
        let first = h.run_one(input);
        let second = h.run_one(input);
        assert_eq!(first, second);
        assert_eq!(h.plugin().calls.len(), 6);
    }

    #[test]
    fn denied_check_still_drops_outputs_and_closes() {
        let mut h = harness(RecordingPlugin::new().check_returning(0));
        let report = h.run_one(b"argv=/bin/ls\nenv=A=1\n");
        assert_eq!(report.check, Some(CheckStatus::Denied));
        assert!(report.closed);
        assert_eq!(report.reset.outputs_dropped, 1 + 1 + 1);
        assert!(h.context().is_clean());
    }

    #[test]
    fn entry_limit_abandons_before_open() {
        let mut h = harness(RecordingPlugin::new()).with_entry_limit(Some(1));
        let report = h.run_one(b"argv=/bin/ls\nargv=-l\n");
        assert_eq!(report.disposition, Disposition::CollectionsIncomplete);
        assert_eq!(report.open, None);
        assert!(h.plugin().calls.is_empty());
    }
}
