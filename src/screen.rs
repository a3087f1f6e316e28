use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::watch,
    task::JoinHandle,
};
use tracing::trace;

use crate::form::{render, FormState, IntakeForm};

const DIVIDER: &str = "----------------------------------------\n";

/// Redraws the screen whenever the form state changes. Ends once the form is
/// dropped.
pub fn spawn_renderer<W>(
    mut states: watch::Receiver<FormState>,
    mut out: W,
) -> JoinHandle<io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = render(&states.borrow_and_update());
            out.write_all(DIVIDER.as_bytes()).await?;
            out.write_all(frame.as_bytes()).await?;
            out.flush().await?;

            if states.changed().await.is_err() {
                break;
            }
        }

        Ok(())
    })
}

/// Feeds each input line to the form as the amount field, then submits it.
pub async fn drive<R>(form: &IntakeForm, input: R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if !form.state().authorized {
            trace!("Ignoring input while unauthorized");
            continue;
        }

        form.submit_text(line).await;
    }

    Ok(())
}
