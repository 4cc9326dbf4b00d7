use std::fmt;
use std::str::FromStr;

/// Cranelift optimisation level for generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// The value of Cranelift's `opt_level` setting.
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

impl FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(OptLevel::None),
            "speed" => Ok(OptLevel::Speed),
            "speed_and_size" | "speed-and-size" => Ok(OptLevel::SpeedAndSize),
            other => Err(format!(
                "unknown opt level '{}' (expected none, speed or speed_and_size)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier on every function.
    pub verify: bool,
    /// Bytes of native stack generated code may use per entry before calls
    /// fail with a stack overflow fault. Must fit the calling thread's stack.
    pub stack_budget: usize,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            verify: cfg!(debug_assertions),
            stack_budget: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name of the thread that applies env updates.
    pub worker_name: String,
    /// Stack size of that thread.
    pub stack_size: usize,
    pub codegen: CodegenConfig,
}

/// Stack the worker keeps for itself beyond the codegen budget.
pub(crate) const WORKER_STACK_RESERVE: usize = 4 << 20;

impl Default for SessionConfig {
    fn default() -> Self {
        let stack_size = 64 << 20;
        Self {
            worker_name: "brj-env-queue".to_string(),
            stack_size,
            codegen: CodegenConfig {
                stack_budget: stack_size - WORKER_STACK_RESERVE,
                ..CodegenConfig::default()
            },
        }
    }
}
