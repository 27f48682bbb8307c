//! Boundary between the orchestrator and the agent connection.
//!
//! Responsible for:
//! - the `AgentLink` seam (real `AgentClient`, or an in-process fake in tests)
//! - mapping config to client options
//! - building the Initialize announcement from the active encounter

use sb_core::config::ConnectionConfig;
use sb_encounter::EncounterCapability;
use sb_proto::client::ReconnectPolicy;
use sb_proto::{
    AgentClient, ClientError, ClientOptions, ClientStatsSnapshot, InitRequest, InitResponse,
    TransitionRequest,
};

/// Blocking agent calls. Implementations serialize their own I/O.
pub trait AgentLink: Send + Sync + 'static {
    fn initialize(&self, req: &InitRequest) -> Result<InitResponse, ClientError>;
    fn get_action(&self, state: &[f32]) -> Result<Vec<i32>, ClientError>;
    fn store_transition(&self, t: &TransitionRequest) -> Result<(), ClientError>;

    fn stats(&self) -> Option<ClientStatsSnapshot> {
        None
    }
}

impl AgentLink for AgentClient {
    fn initialize(&self, req: &InitRequest) -> Result<InitResponse, ClientError> {
        AgentClient::initialize(self, req)
    }

    fn get_action(&self, state: &[f32]) -> Result<Vec<i32>, ClientError> {
        AgentClient::get_action(self, state)
    }

    fn store_transition(&self, t: &TransitionRequest) -> Result<(), ClientError> {
        AgentClient::store_transition(self, t)
    }

    fn stats(&self) -> Option<ClientStatsSnapshot> {
        Some(self.stats_snapshot())
    }
}

pub fn client_options(cfg: &ConnectionConfig) -> ClientOptions {
    ClientOptions {
        host: cfg.host.clone(),
        port: cfg.port,
        connect_timeout: cfg.connect_timeout(),
        io_timeout: cfg.read_timeout(),
        reconnect: ReconnectPolicy {
            max_attempts: cfg.max_reconnect_attempts,
            base_delay: cfg.reconnect_delay(),
        },
    }
}

pub fn init_request(enc: &dyn EncounterCapability) -> InitRequest {
    let layout = enc.layout();
    InitRequest {
        boss_name: enc.boss_name().to_string(),
        observation_size: layout.total_len(),
        action_space_shape: enc.action_variant().shape().to_vec(),
        observation_type: layout.kind().as_str().to_string(),
        vector_obs_size: layout.vector_len,
        visual_width: layout.visual_width(),
        visual_height: layout.visual_height(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::{ArenaSpec, Config};
    use sb_encounter::ArenaEncounter;
    use std::time::Duration;

    #[test]
    fn options_follow_connection_config() {
        let cfg = Config::from_yaml(
            "connection:\n  host: 10.0.0.2\n  port: 9001\n  max_reconnect_attempts: 3\n  reconnect_delay_s: 0.25\n",
        )
        .unwrap();
        let o = client_options(&cfg.connection);
        assert_eq!(o.addr_string(), "10.0.0.2:9001");
        assert_eq!(o.io_timeout, Duration::from_secs(30));
        assert_eq!(o.reconnect.max_attempts, 3);
        assert_eq!(o.reconnect.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn vector_encounter_announces_zero_visual_size() {
        let spec = ArenaSpec {
            visual: None,
            ..ArenaSpec::savage_beastfly()
        };
        let enc = ArenaEncounter::new(spec, None).unwrap();
        let req = init_request(&enc);
        assert_eq!(req.boss_name, "Bone Flyer Giant");
        assert_eq!(req.observation_type, "vector");
        assert_eq!(req.observation_size, 17);
        assert_eq!(req.vector_obs_size, 17);
        assert_eq!(req.visual_width, 0);
        assert_eq!(req.visual_height, 0);
        assert_eq!(req.action_space_shape, vec![3, 3, 2, 2, 2, 2]);
    }
}
