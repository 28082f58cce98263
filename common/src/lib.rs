pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod partitioner;
pub mod protocol;
pub mod registry;
pub mod row;
pub mod task;
pub mod transform;

pub use cache::PartitionCache;
pub use error::{EngineError, Result};
pub use job::{Job, JobId, JobStatus, RddId, TaskRecord, TaskState};
pub use partitioner::{fnv32a, hash_partition};
pub use registry::{FunctionRegistry, RowFunction};
pub use row::Row;
pub use task::{JoinTask, PartitionId, Task, TaskId, TaskReply};
pub use transform::{TransformOp, Transformation};

pub use protocol::{
    ActionReply, DriverInfo, Heartbeat, HeartbeatResponse, JobResults, JoinReply, JoinRequest,
    PartitionAck, ReadCsvRequest, ReadTextFileRequest, RddReply, RegisterPartitionRequest,
    RegisterWorkerRequest, RegisterWorkerResponse, StorePartitionRequest, TransformRequest,
    WorkerId, WorkerInfo, WorkerStatusResponse,
};
