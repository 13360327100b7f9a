//! Memory and per-frame work budgets for streaming
//!
//! [`MemoryBudget`] tracks bytes held by resident chunks on the CPU and GPU
//! and gates uploads once the GPU side is full. [`FrameBudget`] bounds how
//! much completion work the integrator does in a single frame.

/// Budget sizes in megabytes, as they appear in configuration
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MemoryLimits {
    pub cpu_mb: usize,
    pub gpu_mb: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self { cpu_mb: 1024, gpu_mb: 512 }
    }
}

const MB: usize = 1024 * 1024;

/// One side of the budget: a byte limit and what is held against it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BytePool {
    limit: usize,
    used: usize,
}

impl BytePool {
    pub fn with_limit_mb(mb: usize) -> Self {
        Self { limit: mb.saturating_mul(MB), used: 0 }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }

    /// Fraction of the limit in use; above 1.0 when over budget
    pub fn pressure(&self) -> f32 {
        match self.limit {
            0 => 0.0,
            limit => self.used as f32 / limit as f32,
        }
    }

    fn hold(&mut self, bytes: usize) {
        self.used = self.used.saturating_add(bytes);
    }

    fn release(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
    }
}

/// CPU and GPU bytes held by chunk representations.
///
/// CPU meshes are never refused, so CPU pressure is only reported. GPU
/// uploads are gated by [`MemoryBudget::can_upload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    cpu: BytePool,
    gpu: BytePool,
}

impl MemoryBudget {
    pub fn new(cpu_budget_mb: usize, gpu_budget_mb: usize) -> Self {
        Self {
            cpu: BytePool::with_limit_mb(cpu_budget_mb),
            gpu: BytePool::with_limit_mb(gpu_budget_mb),
        }
    }

    pub fn from_limits(limits: &MemoryLimits) -> Self {
        Self::new(limits.cpu_mb, limits.gpu_mb)
    }

    pub fn cpu(&self) -> &BytePool {
        &self.cpu
    }

    pub fn gpu(&self) -> &BytePool {
        &self.gpu
    }

    pub fn add_cpu(&mut self, bytes: usize) {
        self.cpu.hold(bytes);
    }

    pub fn add_gpu(&mut self, bytes: usize) {
        self.gpu.hold(bytes);
    }

    pub fn remove_cpu(&mut self, bytes: usize) {
        self.cpu.release(bytes);
    }

    pub fn remove_gpu(&mut self, bytes: usize) {
        self.gpu.release(bytes);
    }

    pub fn cpu_used(&self) -> usize {
        self.cpu.used()
    }

    pub fn gpu_used(&self) -> usize {
        self.gpu.used()
    }

    pub fn cpu_available(&self) -> usize {
        self.cpu.available()
    }

    pub fn gpu_available(&self) -> usize {
        self.gpu.available()
    }

    pub fn cpu_pressure(&self) -> f32 {
        self.cpu.pressure()
    }

    pub fn gpu_pressure(&self) -> f32 {
        self.gpu.pressure()
    }

    /// Whether an upload of `bytes` fits in the GPU budget
    pub fn can_upload(&self, bytes: usize) -> bool {
        self.gpu.available() >= bytes
    }
}

/// Limits on integrator work per render frame
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FrameBudget {
    /// Completions drained from the generator per frame
    pub max_completions_per_frame: usize,
    /// Bytes uploaded to the device per frame; further ready chunks wait
    pub max_upload_bytes_per_frame: usize,
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self {
            max_completions_per_frame: 32,
            max_upload_bytes_per_frame: 16 * 1024 * 1024,
        }
    }
}
