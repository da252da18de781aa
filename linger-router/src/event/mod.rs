//! 事件（Event）
//!
//! - `options`：事件选项与滞留时长；
//! - `emitted`：已发布事件、消费记录与事件句柄；
//! - `lingering`：滞留事件存储。
//!
pub mod emitted;
pub(crate) mod lingering;
pub mod options;

pub use emitted::{Consumer, EmittedEvent, EventHandle, chain_results};
pub use lingering::LingeringEvent;
pub use options::{EventOptions, EventSettings, Linger};
