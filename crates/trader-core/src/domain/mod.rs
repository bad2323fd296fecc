//! 실행 코어의 도메인 모델.

mod order;
mod position;
mod trade;

pub use order::*;
pub use position::*;
pub use trade::*;
