//! Run requests: arguments, stream bindings and resource limits.

use std::time::Duration;

use bytes::Bytes;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};

use wasm_pool_common::ExecutionConfig;

/// Where the guest's standard input comes from.
#[derive(Debug, Clone, Default)]
pub enum InputBinding {
    /// Reads return end-of-file immediately.
    #[default]
    Empty,
    /// Reads consume the given bytes.
    Bytes(Bytes),
    /// Reads come from the host process's stdin.
    Inherit,
}

/// Where a guest output stream goes.
#[derive(Debug, Clone, Default)]
pub enum OutputBinding {
    /// Output is dropped.
    #[default]
    Discard,
    /// Output is written to the matching host process stream.
    Inherit,
    /// Output is collected into a buffer the caller keeps a handle to.
    Capture(OutputCapture),
}

/// A bounded in-memory buffer for guest output.
///
/// Clones share the same buffer: hand one clone to [`RunArgs`] and read the
/// other after the run.
///
/// Output past the capacity is dropped: the buffer keeps the first `capacity`
/// bytes and the guest's `fd_write` returns `EIO`. The run itself goes on.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    pipe: MemoryOutputPipe,
}

impl OutputCapture {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            pipe: MemoryOutputPipe::new(capacity),
        }
    }

    /// Everything written so far.
    pub fn contents(&self) -> Bytes {
        self.pipe.contents()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

/// Per-run overrides of the execution defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Fuel budget, when fuel metering is enabled.
    pub max_fuel: Option<u64>,
    /// Wall-clock limit for the execution itself (slot wait excluded).
    pub timeout: Option<Duration>,
    /// Linear memory limit in bytes.
    pub max_memory_bytes: Option<usize>,
}

impl ResourceLimits {
    /// Fill unset fields from the execution defaults.
    pub fn resolve(&self, defaults: &ExecutionConfig) -> EffectiveLimits {
        EffectiveLimits {
            max_fuel: self.max_fuel.unwrap_or(defaults.max_fuel),
            timeout: self.timeout.or_else(|| defaults.timeout()),
            max_memory_bytes: self
                .max_memory_bytes
                .unwrap_or_else(|| defaults.max_memory_bytes()),
        }
    }
}

/// Limits in force for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub max_fuel: u64,
    pub timeout: Option<Duration>,
    pub max_memory_bytes: usize,
}

/// A request to run the pooled tool once.
///
/// `args` excludes `argv[0]`; the module name is prepended when the run starts.
///
/// # Example
///
/// ```ignore
/// let stdout = pool.capture();
/// let args = RunArgs::new(["-show_format", "/in/video.mp4"])
///     .stdout(OutputBinding::Capture(stdout.clone()));
/// let status = pool.run(&RunContext::background(), args).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Standard input binding.
    pub stdin: InputBinding,
    /// Standard output binding.
    pub stdout: OutputBinding,
    /// Standard error binding.
    pub stderr: OutputBinding,
    /// Resource limit overrides.
    pub limits: ResourceLimits,
}

impl RunArgs {
    /// Create a request with the given program arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Append one program argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `bytes` to standard input.
    #[must_use]
    pub fn stdin_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.stdin = InputBinding::Bytes(bytes.into());
        self
    }

    /// Set the standard input binding.
    #[must_use]
    pub fn stdin(mut self, binding: InputBinding) -> Self {
        self.stdin = binding;
        self
    }

    /// Set the standard output binding.
    #[must_use]
    pub fn stdout(mut self, binding: OutputBinding) -> Self {
        self.stdout = binding;
        self
    }

    /// Set the standard error binding.
    #[must_use]
    pub fn stderr(mut self, binding: OutputBinding) -> Self {
        self.stderr = binding;
        self
    }

    /// Set resource limit overrides.
    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Apply argv, environment and stdio to a WASI builder.
    pub(crate) fn apply(&self, program: &str, builder: &mut WasiCtxBuilder) {
        builder.arg(program);
        builder.args(self.args.as_slice());

        for (key, value) in &self.env {
            builder.env(key, value);
        }

        match &self.stdin {
            InputBinding::Empty => {}
            InputBinding::Bytes(bytes) => {
                builder.stdin(MemoryInputPipe::new(bytes.clone()));
            }
            InputBinding::Inherit => {
                builder.inherit_stdin();
            }
        }

        match &self.stdout {
            OutputBinding::Discard => {}
            OutputBinding::Inherit => {
                builder.inherit_stdout();
            }
            OutputBinding::Capture(capture) => {
                builder.stdout(capture.pipe.clone());
            }
        }

        match &self.stderr {
            OutputBinding::Discard => {}
            OutputBinding::Inherit => {
                builder.inherit_stderr();
            }
            OutputBinding::Capture(capture) => {
                builder.stderr(capture.pipe.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let args = RunArgs::new(["-v", "quiet"])
            .arg("input.mp4")
            .env("LANG", "C")
            .stdin_bytes(&b"data"[..]);

        assert_eq!(args.args, vec!["-v", "quiet", "input.mp4"]);
        assert_eq!(args.env, vec![("LANG".to_string(), "C".to_string())]);
        assert!(matches!(args.stdin, InputBinding::Bytes(ref b) if b.as_ref() == b"data"));
        assert!(matches!(args.stdout, OutputBinding::Discard));
    }

    #[test]
    fn test_limits_resolve_defaults() {
        let defaults = ExecutionConfig {
            max_fuel: 500,
            timeout_ms: 250,
            max_memory_mb: 1,
            ..Default::default()
        };

        let resolved = ResourceLimits::default().resolve(&defaults);
        assert_eq!(
            resolved,
            EffectiveLimits {
                max_fuel: 500,
                timeout: Some(Duration::from_millis(250)),
                max_memory_bytes: 1024 * 1024,
            }
        );
    }

    #[test]
    fn test_limits_override() {
        let limits = ResourceLimits {
            max_fuel: Some(10),
            timeout: Some(Duration::from_secs(1)),
            max_memory_bytes: Some(4096),
        };

        let resolved = limits.resolve(&ExecutionConfig::default());
        assert_eq!(resolved.max_fuel, 10);
        assert_eq!(resolved.timeout, Some(Duration::from_secs(1)));
        assert_eq!(resolved.max_memory_bytes, 4096);
    }

    #[test]
    fn test_capture_starts_empty() {
        let capture = OutputCapture::new(16);
        assert!(capture.contents().is_empty());
        assert_eq!(capture.to_string_lossy(), "");
    }
}
