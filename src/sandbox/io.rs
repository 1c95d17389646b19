//! In-memory stdio for one sandboxed execution.

use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::WasiCtxBuilder;

/// Standard streams wired into a WASI context.
///
/// Output pipes are bounded; a script that writes past the capacity
/// gets an I/O error inside the interpreter.
#[derive(Clone)]
pub struct SandboxIo {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    stdin: Option<Vec<u8>>,
}

impl SandboxIo {
    /// Streams with optional stdin and the given output capacity.
    pub fn new(input: Option<&str>, max_output_bytes: usize) -> Self {
        Self {
            stdout: MemoryOutputPipe::new(max_output_bytes),
            stderr: MemoryOutputPipe::new(max_output_bytes),
            stdin: input.map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Attach the streams to `builder`.
    pub fn attach(&self, builder: &mut WasiCtxBuilder) {
        let stdin = self.stdin.clone().unwrap_or_default();
        builder
            .stdin(MemoryInputPipe::new(stdin))
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone());
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout.contents()).into_owned()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr.contents()).into_owned()
    }
}
