mod acquire;
mod kairos;

pub use acquire::AcquireError;
pub use kairos::KairosError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
