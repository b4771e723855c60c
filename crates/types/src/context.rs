//! The Runtime Context: the `runtime.*` fields available to expressions
//! during command building and output collection (spec §3, "Runtime
//! Context").

use serde::{Deserialize, Serialize};

/// Resource and path facts made available to `$(runtime.*)` expressions.
///
/// `outdir_size`/`tmpdir_size` are populated lazily (they require a
/// filesystem walk) and `exit_code` is only ever `Some` inside an
/// `outputEval` expression, never during command building — constructing a
/// `RuntimeContext` for the build-command phase simply leaves it `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub outdir: String,
    pub tmpdir: String,
    pub cores: u32,
    pub ram: u64,
    #[serde(default)]
    pub outdir_size: Option<u64>,
    #[serde(default)]
    pub tmpdir_size: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl RuntimeContext {
    pub fn for_command_building(outdir: impl Into<String>, tmpdir: impl Into<String>, cores: u32, ram: u64) -> Self {
        Self {
            outdir: outdir.into(),
            tmpdir: tmpdir.into(),
            cores,
            ram,
            outdir_size: None,
            tmpdir_size: None,
            exit_code: None,
        }
    }

    /// A context as seen by `outputEval`: populated outdir/tmpdir sizes and
    /// the process exit code (spec §9, Open Question i — decided "yes",
    /// checksum/size on output Files are populated before `outputEval` runs,
    /// and `runtime.exitCode` is exposed alongside them).
    pub fn for_output_eval(mut self, outdir_size: u64, tmpdir_size: u64, exit_code: i32) -> Self {
        self.outdir_size = Some(outdir_size);
        self.tmpdir_size = Some(tmpdir_size);
        self.exit_code = Some(exit_code);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_building_context_has_no_exit_code() {
        let ctx = RuntimeContext::for_command_building("/out", "/tmp/wfl", 1, 1024);
        assert!(ctx.exit_code.is_none());
        assert!(ctx.outdir_size.is_none());
    }

    #[test]
    fn output_eval_context_carries_exit_code_and_sizes() {
        let ctx = RuntimeContext::for_command_building("/out", "/tmp/wfl", 1, 1024).for_output_eval(4096, 0, 0);
        assert_eq!(ctx.exit_code, Some(0));
        assert_eq!(ctx.outdir_size, Some(4096));
    }
}
