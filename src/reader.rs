use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandRequest;
use crate::connection::Connection;
use crate::error::SqlAccessError;
use crate::params::Parameter;
use crate::results::{CustomDbRow, index_columns};
use crate::types::{CommandKind, RowValues};

/// Rows buffered between the backend task and the reader.
const ROW_BUFFER: usize = 64;

type Ready = oneshot::Sender<Result<Arc<Vec<String>>, SqlAccessError>>;

/// Backend side of a [`StreamingReader`].
///
/// Only the first result set is forwarded. Its column names release the reader; rows of
/// any later result set are refused.
pub(crate) struct RowSink {
    tx: mpsc::Sender<Result<Vec<RowValues>, SqlAccessError>>,
    ready: Option<Ready>,
    accepting: bool,
}

impl RowSink {
    fn new(tx: mpsc::Sender<Result<Vec<RowValues>, SqlAccessError>>, ready: Ready) -> Self {
        Self {
            tx,
            ready: Some(ready),
            accepting: true,
        }
    }

    /// Announce the columns of the next result set.
    pub(crate) fn columns(&mut self, names: Vec<String>) {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Ok(Arc::new(names)));
            }
            None => self.accepting = false,
        }
    }

    /// Whether rows are still wanted.
    pub(crate) fn accepting(&self) -> bool {
        self.accepting && self.ready.is_none()
    }

    /// Hand one row to the reader. `false` means stop producing.
    pub(crate) async fn push(&mut self, values: Vec<RowValues>) -> bool {
        if !self.accepting() {
            return false;
        }
        if self.tx.send(Ok(values)).await.is_err() {
            // reader went away
            self.accepting = false;
            return false;
        }
        true
    }

    fn finish(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(Arc::new(Vec::new())));
        }
    }

    async fn fail(&mut self, err: SqlAccessError) {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(err));
            }
            None => {
                let _ = self.tx.send(Err(err)).await;
            }
        }
    }
}

/// Forward-only reader over the first result set of a command.
///
/// The reader owns its connection. The connection is closed exactly once: when the rows
/// run out, when the command fails, or when the reader is closed or dropped early.
///
/// Rows can be pulled with [`next_row`](Self::next_row) or consumed as a
/// [`Stream`](futures_util::Stream).
pub struct StreamingReader {
    columns: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    rows: mpsc::Receiver<Result<Vec<RowValues>, SqlAccessError>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StreamingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingReader")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl StreamingReader {
    /// Open `conn` and start the command on a background task.
    ///
    /// Resolves once the first result set's columns are known, so a failing command
    /// surfaces here rather than on the first row.
    ///
    /// # Errors
    /// Connection or command errors. The connection has been closed by then.
    pub(crate) async fn open(
        mut conn: Connection,
        text: String,
        kind: CommandKind,
        params: Vec<Parameter>,
    ) -> Result<Self, SqlAccessError> {
        let (tx, rows) = mpsc::channel(ROW_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut sink = RowSink::new(tx, ready_tx);
            let outcome = match conn.open().await {
                Ok(()) => {
                    let req = CommandRequest {
                        text: &text,
                        kind,
                        params: &params,
                    };
                    conn.stream(&req, &mut sink).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => sink.finish(),
                Err(e) => sink.fail(e).await,
            }
            conn.close().await;
            debug!(provider = %conn.provider(), "streaming reader connection closed");
        });

        match ready_rx.await {
            Ok(Ok(columns)) => Ok(Self {
                column_index: index_columns(&columns),
                columns,
                rows,
                task: Some(task),
            }),
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => {
                let joined = task.await;
                Err(SqlAccessError::ExecutionError(match joined {
                    Err(e) => format!("streaming task failed: {e}"),
                    Ok(()) => "streaming task ended without a result".to_string(),
                }))
            }
        }
    }

    /// Column names of the result set; empty when the command produced none.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advance to the next row. `Ok(None)` once the rows are exhausted.
    ///
    /// # Errors
    /// A driver or decode error raised while producing the row.
    pub async fn next_row(&mut self) -> Result<Option<CustomDbRow>, SqlAccessError> {
        match self.rows.recv().await {
            Some(Ok(values)) => Ok(Some(self.row(values))),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Stop reading and wait for the connection to be closed.
    pub async fn close(mut self) {
        self.rows.close();
        while self.rows.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "streaming task failed");
            }
        }
    }

    fn row(&self, values: Vec<RowValues>) -> CustomDbRow {
        CustomDbRow {
            column_names: Arc::clone(&self.columns),
            rows: values,
            column_index_cache: Arc::clone(&self.column_index),
        }
    }
}

impl Stream for StreamingReader {
    type Item = Result<CustomDbRow, SqlAccessError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rows.poll_recv(cx) {
            Poll::Ready(Some(Ok(values))) => Poll::Ready(Some(Ok(self.row(values)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
