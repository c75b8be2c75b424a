//! The Live insitu link between a running simulation and a visualization
//! server.
//!
//! Both ends run a [`LiveInsituLink`]; its [`ProcessType`] picks the role.
//!
//! Visualization (rank 0) listens. When the simulation connects it receives
//! the simulation's full pipeline state, keeps it as a NUL-terminated byte
//! buffer, and registers the update and post-process remote calls. From
//! then on [`process_rmis`](LiveInsituLink::process_rmis) serves them.
//!
//! Simulation (rank 0) connects, sends its pipeline state, then once per
//! time step calls [`simulation_update`](LiveInsituLink::simulation_update)
//! and [`simulation_post_process`](LiveInsituLink::simulation_post_process).
//! The simulation never waits for an absent visualization: without a
//! connection a tick retries the connect and otherwise reapplies the last
//! state it received.
//!
//! Other ranks have no transport role.

use std::time::Duration;

use serde::Serialize;

use pvlive_core::{ProxyManager, StateLoader, XmlElement};

use crate::config::{LinkConfig, ProcessType};
use crate::controller::{Connection, Listener, MultiProcessController, NetworkAccessManager};
use crate::error::LinkError;
use crate::frame::tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Uninitialized,
    /// Visualization waiting for the simulation to connect.
    Listening,
    Connected,
    /// The connection broke; the next tick or event poll may recover it.
    Disconnected,
}

/// What a [`simulation_update`](LiveInsituLink::simulation_update) tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The visualization sent a new state, which was adopted and applied.
    Updated { bytes: usize },
    /// The visualization reported no change. `reapplied` tells whether a
    /// cached state existed to apply again.
    Unchanged { reapplied: bool },
    /// No connection; the cached state was reapplied if there was one.
    Offline { reapplied: bool },
}

/// A remote call served by [`process_rmis`](LiveInsituLink::process_rmis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RmiCall {
    SimulationUpdate { time: f64 },
    SimulationPostProcess { time: f64 },
}

/// Visualization-side targets of the simulation's remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RmiHandler {
    SimulationUpdate,
    SimulationPostProcess,
}

impl RmiHandler {
    const ALL: [RmiHandler; 2] = [
        RmiHandler::SimulationUpdate,
        RmiHandler::SimulationPostProcess,
    ];

    fn tag(self) -> u32 {
        match self {
            RmiHandler::SimulationUpdate => tags::UPDATE_RMI,
            RmiHandler::SimulationPostProcess => tags::POSTPROCESS_RMI,
        }
    }
}

/// One end of the insitu link.
pub struct LiveInsituLink<N: NetworkAccessManager> {
    config: LinkConfig,
    network: N,
    state: LinkState,
    listener: Option<N::Listener>,
    controller: Option<MultiProcessController<N::Conn>>,
    /// Visualization: pipeline state received at handshake, NUL-terminated.
    insitu_xml_state: Option<Vec<u8>>,
    /// Simulation: last pipeline state received from the visualization.
    xml_state: Option<XmlElement>,
    rmis: Vec<(u32, RmiHandler)>,
    last_post_process_time: Option<f64>,
}

impl<N: NetworkAccessManager> LiveInsituLink<N> {
    pub fn new(config: LinkConfig, network: N) -> Self {
        LiveInsituLink {
            config,
            network,
            state: LinkState::Uninitialized,
            listener: None,
            controller: None,
            insitu_xml_state: None,
            xml_state: None,
            rmis: Vec::new(),
            last_post_process_time: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_some()
    }

    /// Visualization: handshake state as received, plus a NUL terminator.
    pub fn insitu_xml_state(&self) -> Option<&[u8]> {
        self.insitu_xml_state.as_deref()
    }

    /// Visualization: the handshake state parsed.
    pub fn insitu_state(&self) -> Result<Option<XmlElement>, LinkError> {
        self.insitu_xml_state
            .as_deref()
            .map(XmlElement::parse_bytes)
            .transpose()
            .map_err(LinkError::from)
    }

    /// Simulation: state reapplied on ticks without news.
    pub fn xml_state(&self) -> Option<&XmlElement> {
        self.xml_state.as_ref()
    }

    /// Tags with a registered remote-call handler.
    pub fn registered_rmis(&self) -> Vec<u32> {
        self.rmis.iter().map(|(tag, _)| *tag).collect()
    }

    pub fn last_post_process_time(&self) -> Option<f64> {
        self.last_post_process_time
    }

    /// Sets up this end's transport role. Returns immediately if already
    /// connected. A visualization that is already listening checks for a
    /// connection that arrived in the meantime. A simulation whose connect
    /// fails stays offline and retries on the next tick.
    pub async fn initialize(&mut self, pm: &dyn ProxyManager) -> Result<(), LinkError> {
        if self.controller.is_some() {
            return Ok(());
        }
        if !self.config.is_root() {
            tracing::debug!(rank = self.config.rank, "non-root rank has no transport role");
            return Ok(());
        }
        match self.config.process_type {
            ProcessType::Visualization => self.initialize_visualization().await,
            ProcessType::Simulation => {
                self.initialize_simulation(pm).await;
                Ok(())
            }
        }
    }

    async fn initialize_visualization(&mut self) -> Result<(), LinkError> {
        if self.listener.is_none() {
            let url = self.config.listen_url();
            let connection = self.network.new_connection(&url).await?;
            match connection {
                Connection::Listening(listener) => {
                    tracing::info!(%url, "waiting for simulation");
                    self.listener = Some(listener);
                    self.state = LinkState::Listening;
                }
                Connection::Established(conn) => {
                    return self.visualization_connected(conn).await;
                }
            }
        }

        // A connection that raced the setup is handled in line.
        let arrived = match self.listener.as_mut() {
            Some(listener) => listener.try_accept().await,
            None => Ok(None),
        };
        match arrived {
            Ok(Some(conn)) => self.visualization_connected(conn).await,
            Ok(None) => Ok(()),
            Err(err) if err.is_rejected_peer() => {
                tracing::warn!(error = %err, "rejected simulation");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn initialize_simulation(&mut self, pm: &dyn ProxyManager) {
        let url = self.config.connect_url();
        let conn = match self.network.new_connection(&url).await {
            Ok(Connection::Established(conn)) => conn,
            Ok(Connection::Listening(_)) => {
                tracing::warn!(%url, "connect URL produced a listener");
                return;
            }
            Err(err) => {
                tracing::debug!(%url, error = %err, "visualization not reachable; will retry");
                return;
            }
        };
        let mut controller = MultiProcessController::new(conn);
        let sent = match pm.save_state().to_xml_string() {
            Ok(text) => {
                controller
                    .send_state(tags::HANDSHAKE_LENGTH, tags::HANDSHAKE_PAYLOAD, text.as_bytes())
                    .await
            }
            Err(err) => Err(err.into()),
        };
        match sent {
            Ok(()) => {
                tracing::info!(%url, "connected to visualization");
                self.controller = Some(controller);
                self.state = LinkState::Connected;
            }
            Err(err) => tracing::warn!(%url, error = %err, "handshake failed; will retry"),
        }
    }

    /// Visualization: waits up to `timeout` for the simulation to connect
    /// and completes the handshake. Returns whether a connection was made.
    pub async fn process_events(&mut self, timeout: Duration) -> Result<bool, LinkError> {
        if self.controller.is_some() {
            return Ok(false);
        }
        let Some(listener) = self.listener.as_mut() else {
            return Ok(false);
        };
        let accepted = listener.accept(timeout).await;
        match accepted {
            Ok(Some(conn)) => {
                self.visualization_connected(conn).await?;
                Ok(self.controller.is_some())
            }
            Ok(None) => Ok(false),
            Err(err) if err.is_rejected_peer() => {
                tracing::warn!(error = %err, "rejected simulation");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn visualization_connected(&mut self, conn: N::Conn) -> Result<(), LinkError> {
        let mut controller = MultiProcessController::new(conn);
        let received = controller
            .receive_state(
                tags::HANDSHAKE_LENGTH,
                tags::HANDSHAKE_PAYLOAD,
                Some(self.config.handshake_timeout()),
            )
            .await;
        let mut state = match received {
            Ok(state) => state,
            Err(err) if err.is_transport() => {
                tracing::warn!(error = %err, "simulation handshake failed");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        tracing::info!(bytes = state.len(), "received simulation state");
        state.push(0);
        self.insitu_xml_state = Some(state);

        if self.rmis.is_empty() {
            self.rmis = RmiHandler::ALL.iter().map(|h| (h.tag(), *h)).collect();
        }
        self.controller = Some(controller);
        self.state = LinkState::Connected;
        Ok(())
    }

    /// Visualization: serves at most one remote call, waiting up to
    /// `timeout` for it. A broken connection is dropped and reported as no
    /// call; the link goes back to listening.
    pub async fn process_rmis(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RmiCall>, LinkError> {
        let tags: Vec<u32> = self.registered_rmis();
        let Some(controller) = self.controller.as_mut() else {
            return Ok(None);
        };
        let next = controller.next_rmi(&tags, Some(timeout)).await;
        let (tag, time) = match next {
            Ok(Some(call)) => call,
            Ok(None) => return Ok(None),
            Err(err) if err.is_transport() => {
                tracing::info!(error = %err, "simulation disconnected");
                self.disconnect().await;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let handler = self
            .rmis
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, h)| *h)
            .ok_or_else(|| LinkError::protocol(format!("no handler for remote call {tag}")))?;

        let call = match handler {
            RmiHandler::SimulationUpdate => {
                self.on_simulation_update(time).await?;
                RmiCall::SimulationUpdate { time }
            }
            RmiHandler::SimulationPostProcess => {
                self.on_simulation_post_process(time);
                RmiCall::SimulationPostProcess { time }
            }
        };
        Ok(Some(call))
    }

    /// Answers an update call. Pushing visualization-side edits back to the
    /// simulation is not supported yet, so the answer is always "no change".
    async fn on_simulation_update(&mut self, time: f64) -> Result<(), LinkError> {
        tracing::debug!(time, "simulation update");
        let Some(controller) = self.controller.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        let sent = controller
            .send_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, &[])
            .await;
        if let Err(err) = sent {
            if !err.is_transport() {
                return Err(err);
            }
            tracing::info!(error = %err, "simulation disconnected");
            self.disconnect().await;
        }
        Ok(())
    }

    fn on_simulation_post_process(&mut self, time: f64) {
        tracing::debug!(time, "simulation post-process");
        self.last_post_process_time = Some(time);
    }

    /// Simulation: one time-step exchange with the visualization.
    pub async fn simulation_update(
        &mut self,
        pm: &mut dyn ProxyManager,
        time: f64,
    ) -> Result<UpdateOutcome, LinkError> {
        if self.controller.is_none() {
            self.initialize(&*pm).await?;
        }
        let update_timeout = self.config.update_timeout();
        let Some(controller) = self.controller.as_mut() else {
            return self.offline(pm);
        };

        let exchanged = match controller.trigger_rmi(tags::UPDATE_RMI, time).await {
            Ok(()) => {
                controller
                    .receive_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, update_timeout)
                    .await
            }
            Err(err) => Err(err),
        };

        match exchanged {
            Ok(bytes) if bytes.is_empty() => {
                let reapplied = self.reapply(pm)?;
                Ok(UpdateOutcome::Unchanged { reapplied })
            }
            Ok(bytes) => {
                let state = XmlElement::parse_bytes(&bytes)?;
                tracing::debug!(time, bytes = bytes.len(), "adopting updated state");
                self.xml_state = Some(state);
                self.reapply(pm)?;
                Ok(UpdateOutcome::Updated { bytes: bytes.len() })
            }
            Err(err) if err.is_transport() => {
                tracing::warn!(time, error = %err, "lost visualization; continuing offline");
                self.disconnect().await;
                self.offline(pm)
            }
            Err(err) => Err(err),
        }
    }

    /// Simulation: tells the visualization this step's extracts are ready.
    /// Skipped without a connection.
    pub async fn simulation_post_process(&mut self, time: f64) -> Result<(), LinkError> {
        let Some(controller) = self.controller.as_mut() else {
            return Ok(());
        };
        let sent = controller.trigger_rmi(tags::POSTPROCESS_RMI, time).await;
        if let Err(err) = sent {
            if !err.is_transport() {
                return Err(err);
            }
            tracing::warn!(time, error = %err, "lost visualization; continuing offline");
            self.disconnect().await;
        }
        Ok(())
    }

    /// Closes the connection. A visualization keeps listening.
    pub async fn drop_connection(&mut self) {
        self.disconnect().await;
    }

    async fn disconnect(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            if let Err(err) = controller.close().await {
                tracing::debug!(error = %err, "error while closing connection");
            }
        }
        self.state = if self.listener.is_some() {
            LinkState::Listening
        } else {
            LinkState::Disconnected
        };
    }

    fn offline(&mut self, pm: &mut dyn ProxyManager) -> Result<UpdateOutcome, LinkError> {
        let reapplied = self.reapply(pm)?;
        Ok(UpdateOutcome::Offline { reapplied })
    }

    fn reapply(&self, pm: &mut dyn ProxyManager) -> Result<bool, LinkError> {
        let Some(state) = &self.xml_state else {
            return Ok(false);
        };
        StateLoader::load_state(pm, state)?;
        Ok(true)
    }
}
