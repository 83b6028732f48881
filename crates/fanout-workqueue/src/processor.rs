use async_trait::async_trait;

/// Status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
  NotDone,
  Done,
  Failed,
}

impl WorkStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, WorkStatus::NotDone)
  }
}

/// Performs the work for one item.
///
/// `process` is called once per attempt. It must not retry internally;
/// returning `NotDone` (or an error) asks the queue to try again later.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
  type Item: Send + Sync + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  async fn process(&self, item: &Self::Item) -> Result<WorkStatus, Self::Error>;
}
