pub mod admission;
pub mod aggregator;
pub mod cancel;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod types;
#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{
    Audio, AudioId, CreateTaskMessage, Language, SourceKind, Task, TaskId, TaskStatus,
};

pub use admission::{AdmissionController, MemoryProbe, SysinfoMemoryProbe};
pub use aggregator::{ResultAggregator, ResultArtifact};
pub use cancel::CancellationMonitor;
pub use queue::{ChannelTaskQueue, IntakeGate, SqliteTaskQueue, TaskQueue};
pub use retry::{RetryDecision, RetryPolicy};

// 重导出调度器接口
pub use scheduler::{HandleOutcome, TaskOrchestrator, TaskScheduler, TaskWorker};
