use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{
    Direction, HubEvent, ProgressUpdate, TransferEvent, TransferOutcome, TransferOutput,
};

/// Per-transfer event stream handed to callers
pub type EventSink<T> = mpsc::UnboundedSender<TransferEvent<T>>;

/// Process-wide fan-out of progress and terminal outcomes (feeds the
/// websocket route)
pub type ProgressHub = broadcast::Sender<HubEvent>;

/// A transfer running on its own task.
///
/// Events end with exactly one terminal `Completed` or `Failed`. Dropping the
/// handle does not cancel the transfer.
pub struct TransferHandle<T> {
    session_id: String,
    events: mpsc::UnboundedReceiver<TransferEvent<T>>,
    cancel: CancellationToken,
    task: JoinHandle<TransferResult<T>>,
}

impl<T> TransferHandle<T> {
    pub(crate) fn new(
        session_id: String,
        events: mpsc::UnboundedReceiver<TransferEvent<T>>,
        cancel: CancellationToken,
        task: JoinHandle<TransferResult<T>>,
    ) -> Self {
        Self {
            session_id,
            events,
            cancel,
            task,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Abandon in-flight chunk operations; the transfer fails with `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event, or `None` once the transfer task has finished and the
    /// stream is drained
    pub async fn next_event(&mut self) -> Option<TransferEvent<T>> {
        self.events.recv().await
    }

    /// Wait for the transfer to finish
    pub async fn join(self) -> TransferResult<T> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Aborted(e.to_string())),
        }
    }
}

/// Emits progress and terminal events for one session.
pub(crate) struct ProgressReporter<T> {
    session_id: String,
    direction: Direction,
    file_name: String,
    transfer_id: Option<String>,
    events: Option<EventSink<T>>,
    hub: Option<ProgressHub>,
}

impl<T: Clone + TransferOutput> ProgressReporter<T> {
    pub(crate) fn new(
        session_id: &str,
        direction: Direction,
        file_name: &str,
        events: Option<EventSink<T>>,
        hub: Option<ProgressHub>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            direction,
            file_name: file_name.to_string(),
            transfer_id: None,
            events,
            hub,
        }
    }

    /// File name becomes known after the manifest arrives for downloads
    pub(crate) fn set_file_name(&mut self, file_name: &str) {
        self.file_name = file_name.to_string();
    }

    pub(crate) fn set_transfer_id(&mut self, transfer_id: &str) {
        self.transfer_id = Some(transfer_id.to_string());
    }

    fn publish(&self, event: HubEvent) {
        if let Some(hub) = &self.hub {
            // No subscribers is fine
            let _ = hub.send(event);
        }
    }

    pub(crate) fn progress(&self, done: u32, total: u32) {
        let percent_complete = if total == 0 {
            0.0
        } else {
            done as f32 / total as f32 * 100.0
        };
        let update = ProgressUpdate {
            session_id: self.session_id.clone(),
            file_name: self.file_name.clone(),
            percent_complete,
        };

        self.publish(HubEvent::Progress(update.clone()));
        if let Some(events) = &self.events {
            let _ = events.send(TransferEvent::Progress(update));
        }
    }

    pub(crate) fn finish(&self, result: &TransferResult<T>) {
        let outcome = match result {
            Ok(value) => TransferOutcome {
                session_id: self.session_id.clone(),
                direction: self.direction,
                file_name: self.file_name.clone(),
                transfer_id: Some(value.transfer_id().to_string()),
                error: None,
                error_kind: None,
                needs_reconciliation: false,
            },
            Err(e) => TransferOutcome {
                session_id: self.session_id.clone(),
                direction: self.direction,
                file_name: self.file_name.clone(),
                transfer_id: e
                    .transfer_id()
                    .map(str::to_string)
                    .or_else(|| self.transfer_id.clone()),
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
                needs_reconciliation: e.needs_reconciliation(),
            },
        };
        self.publish(HubEvent::Finished(outcome));

        if let Some(events) = &self.events {
            let event = match result {
                Ok(value) => TransferEvent::Completed(value.clone()),
                Err(e) => TransferEvent::Failed(e.to_string()),
            };
            let _ = events.send(event);
        }
    }
}
