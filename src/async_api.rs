use crate::{BadgeRequest, BadgeService, Error, OutputFormat, RasterBackend, RenderedBadge, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Render(BadgeRequest, OutputFormat, RasterBackend, oneshot::Sender<Result<RenderedBadge>>),
    Colors(oneshot::Sender<Vec<String>>),
}

/// An async-friendly renderer backed by dedicated worker threads.
///
/// Composition and rasterization are blocking (external converters run as
/// subprocesses), so they execute on a small pool of plain threads that pull
/// commands from a shared queue. Callers await a oneshot reply. Dropping the
/// last handle, or calling `close`, lets the workers exit.
#[derive(Clone)]
pub struct AsyncRenderer {
    cmd_tx: Sender<Command>,
}

fn worker_loop(service: Arc<BadgeService>, queue: Arc<Mutex<Receiver<Command>>>) {
    loop {
        // Hold the lock only while receiving.
        let cmd = {
            let Ok(rx) = queue.lock() else { return };
            match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => return,
            }
        };
        match cmd {
            Command::Render(req, format, backend, resp) => {
                let res = service.render(&req, format, backend);
                if let Err(e) = &res {
                    log::debug!("render failed: {}", e);
                }
                let _ = resp.send(res);
            }
            Command::Colors(resp) => {
                let _ = resp.send(service.templates().colors().to_vec());
            }
        }
    }
}

impl AsyncRenderer {
    /// Spawn `workers` threads (at least one) sharing `service`.
    pub fn new(service: Arc<BadgeService>, workers: usize) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let queue = Arc::new(Mutex::new(cmd_rx));

        for i in 0..workers.max(1) {
            let service = Arc::clone(&service);
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("badge-worker-{}", i))
                .spawn(move || worker_loop(service, queue))
                .map_err(|e| Error::Other(format!("Worker spawn failed: {}", e)))?;
        }

        Ok(Self { cmd_tx })
    }

    /// Render a badge on a worker thread.
    pub async fn render(
        &self,
        request: BadgeRequest,
        format: OutputFormat,
        backend: RasterBackend,
    ) -> Result<RenderedBadge> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Render(request, format, backend, tx))
            .map_err(|_| Error::Other("Renderer is closed".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Render canceled: {}", e)))?
    }

    /// Convenience: render an SVG badge
    pub async fn render_svg(&self, request: BadgeRequest) -> Result<Vec<u8>> {
        let badge = self
            .render(request, OutputFormat::Svg, RasterBackend::Default)
            .await?;
        Ok(badge.bytes)
    }

    /// The template's Color Catalog
    pub async fn colors(&self) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Colors(tx))
            .map_err(|_| Error::Other("Renderer is closed".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Colors canceled: {}", e)))
    }

    /// Drop this handle; workers exit once every clone is gone.
    pub async fn close(self) -> Result<()> {
        drop(self.cmd_tx);
        Ok(())
    }
}
