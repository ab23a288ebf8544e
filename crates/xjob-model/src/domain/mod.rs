mod ids;
pub use ids::{JobId, TaskId};

mod job_type;
pub use job_type::JobType;

mod block_strategy;
pub use block_strategy::BlockStrategy;

mod result_code;
pub use result_code::ResultCode;

mod task;
pub use task::{Task, TaskSource};

mod task_result;
pub use task_result::TaskResult;

mod log_range;
pub use log_range::LogRange;

mod op_result;
pub use op_result::JobOpResult;

mod app_name;
pub use app_name::AppName;

/// Timeout value in seconds, `0` meaning unbounded.
pub type TimeoutSec = u64;
