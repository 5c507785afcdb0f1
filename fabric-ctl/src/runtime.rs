//! Event loop that serializes all controller work onto one task.
//!
//! Switch connections submit [`ControllerEvent`]s through a cloneable
//! [`ControllerHandle`]. A single tokio task owns the [`Controller`] and
//! handles events one at a time in arrival order, so no handler ever sees a
//! half-applied update from another.

use crate::controller::Controller;
use crate::error::{ControllerError, Result};
use crate::event::{ControllerEvent, DatapathId, PortNo};
use crate::flow::Southbound;
use std::collections::BTreeSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// Cloneable sender for controller events.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    /// Queue an event. Fails only once the event loop has stopped.
    pub fn submit(&self, event: ControllerEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| ControllerError::ChannelClosed)
    }

    pub fn switch_attach(&self, dpid: DatapathId, ports: BTreeSet<PortNo>) -> Result<()> {
        self.submit(ControllerEvent::SwitchAttach { dpid, ports })
    }

    pub fn link_discovered(
        &self,
        src: DatapathId,
        src_port: PortNo,
        dst: DatapathId,
        dst_port: PortNo,
    ) -> Result<()> {
        self.submit(ControllerEvent::LinkDiscovered {
            src,
            src_port,
            dst,
            dst_port,
        })
    }

    pub fn packet_in(
        &self,
        dpid: DatapathId,
        in_port: PortNo,
        buffer_id: Option<u32>,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.submit(ControllerEvent::PacketIn {
            dpid,
            in_port,
            buffer_id,
            payload,
        })
    }

    pub fn switch_detach(&self, dpid: DatapathId) -> Result<()> {
        self.submit(ControllerEvent::SwitchDetach { dpid })
    }
}

/// The running event loop.
pub struct ControllerTask<S> {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<Controller<S>>,
}

impl<S: Southbound + Send + 'static> ControllerTask<S> {
    /// Stop accepting events, finish the ones already queued and return the
    /// controller.
    pub async fn shutdown(self) -> std::result::Result<Controller<S>, JoinError> {
        let _ = self.shutdown_tx.send(());
        self.join.await
    }

    /// Wait for the loop to end on its own, which happens once every
    /// [`ControllerHandle`] has been dropped.
    pub async fn join(self) -> std::result::Result<Controller<S>, JoinError> {
        let ControllerTask { shutdown_tx, join } = self;
        let result = join.await;
        drop(shutdown_tx);
        result
    }
}

/// Move `controller` onto its own task.
pub fn spawn<S: Southbound + Send + 'static>(
    controller: Controller<S>,
) -> (ControllerHandle, ControllerTask<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(run(controller, rx, shutdown_rx));
    (ControllerHandle { tx }, ControllerTask { shutdown_tx, join })
}

async fn run<S: Southbound>(
    mut controller: Controller<S>,
    mut rx: mpsc::UnboundedReceiver<ControllerEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Controller<S> {
    info!("Controller event loop started");
    let mut handled = 0u64;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    debug!("All controller handles dropped");
                    break;
                };
                controller.handle_event(event);
                handled += 1;
            }
            Ok(()) = &mut shutdown_rx => {
                info!("Shutdown requested, draining queued events");
                rx.close();
                while let Some(event) = rx.recv().await {
                    controller.handle_event(event);
                    handled += 1;
                }
                break;
            }
        }
    }

    info!(
        handled,
        switches = controller.topology().switch_count(),
        hosts = controller.hosts().len(),
        "Controller event loop stopped"
    );
    controller
}
