//! Integration tests for the chunked multicast sender: chunking by MTU,
//! poll-until-complete, tolerance of failed polls, and the failure and
//! deadline paths.

use async_trait::async_trait;
use dmp_fuota::error::FuotaError;
use dmp_fuota::fuota::orchestrator::{
    DeploymentDevice, DeploymentRequest, DeploymentStatus, DeviceDeploymentStatus,
    FuotaOrchestrator, LogEvent,
};
use dmp_fuota::fuota::{DownlinkSpeed, DownlinkStats, MulticastClass, MulticastSender, Region};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_test::assert_ok;

const DEV_EUI: &str = "0102030405060708";

/// Orchestrator with scripted status polls and per-device logs; every
/// created deployment is recorded.
struct ScriptedOrchestrator {
    created: Mutex<Vec<DeploymentRequest>>,
    statuses: Mutex<VecDeque<Result<DeploymentStatus, FuotaError>>>,
    /// Status returned once the script runs dry
    fallback: DeploymentStatus,
    logs: Mutex<HashMap<String, Result<Vec<LogEvent>, String>>>,
}

impl ScriptedOrchestrator {
    fn new(statuses: Vec<Result<DeploymentStatus, FuotaError>>, fallback: DeploymentStatus) -> Self {
        ScriptedOrchestrator {
            created: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses.into()),
            fallback,
            logs: Mutex::new(HashMap::new()),
        }
    }

    fn with_logs(self, dev_eui: &str, logs: Result<Vec<LogEvent>, String>) -> Self {
        self.logs.lock().unwrap().insert(dev_eui.to_string(), logs);
        self
    }
}

#[async_trait]
impl FuotaOrchestrator for ScriptedOrchestrator {
    async fn create_deployment(&self, request: &DeploymentRequest) -> Result<String, FuotaError> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(format!("deployment-{}", created.len()))
    }

    async fn deployment_status(&self, _deployment_id: &str) -> Result<DeploymentStatus, FuotaError> {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn device_logs(
        &self,
        _deployment_id: &str,
        dev_eui: &str,
    ) -> Result<Vec<LogEvent>, FuotaError> {
        match self.logs.lock().unwrap().get(dev_eui) {
            Some(Ok(logs)) => Ok(logs.clone()),
            Some(Err(message)) => Err(FuotaError::OrchestratorUnavailable(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

fn event(command: &str, fields: &[(&str, &str)]) -> LogEvent {
    LogEvent {
        command: command.to_string(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn complete_session_logs() -> Vec<LogEvent> {
    vec![
        event("FragSessionSetupReq", &[("nb_frag", "32")]),
        event(
            "FragSessionStatusAns",
            &[("nb_frag_received", "32"), ("missing_frag", "0")],
        ),
    ]
}

fn status_with_devices(frag_completed: i64, dev_euis: &[&str]) -> DeploymentStatus {
    DeploymentStatus {
        mc_group_setup_completed_at: 100,
        enqueue_completed_at: 130,
        frag_status_completed_at: frag_completed,
        device_status: dev_euis
            .iter()
            .map(|dev_eui| DeviceDeploymentStatus {
                dev_eui: dev_eui.to_string(),
                logs: Vec::new(),
                logs_error: None,
            })
            .collect(),
    }
}

fn sender<'a>(orchestrator: &'a ScriptedOrchestrator, devices: &'a [DeploymentDevice]) -> MulticastSender<'a> {
    MulticastSender {
        orchestrator,
        application_id: "42",
        devices,
        class: MulticastClass::ClassC,
        speed: DownlinkSpeed::Slow,
        region: Region::Us915,
        send_max_duration_s: 500.0,
    }
}

fn devices() -> Vec<DeploymentDevice> {
    vec![DeploymentDevice {
        dev_eui: DEV_EUI.to_string(),
        gen_app_key: "000102030405060708090a0b0c0d0e0f".to_string(),
    }]
}

#[tokio::test(start_paused = true)]
async fn completes_on_second_poll() {
    // the first poll still has the fragmentation status pending
    let orchestrator = ScriptedOrchestrator::new(
        vec![Ok(status_with_devices(0, &[DEV_EUI]))],
        status_with_devices(430, &[DEV_EUI]),
    )
    .with_logs(DEV_EUI, Ok(complete_session_logs()));
    let fleet = devices();
    let mut stats = DownlinkStats::new();

    sender(&orchestrator, &fleet)
        .send(&[0xAB; 100], &mut stats)
        .await
        .unwrap();

    assert_eq!(orchestrator.created.lock().unwrap().len(), 1);
    let report = stats.report();
    assert_eq!(report.deployments, 1);
    assert!(report.multicast_utilization > 0.0);
}

#[tokio::test(start_paused = true)]
async fn chunks_payload_by_mtu() {
    // 2500 B over a 1024 B MTU takes three deployments
    let orchestrator = ScriptedOrchestrator::new(Vec::new(), status_with_devices(430, &[DEV_EUI]))
        .with_logs(DEV_EUI, Ok(complete_session_logs()));
    let fleet = devices();
    let mut stats = DownlinkStats::new();
    let payload = vec![0x5A; 2500];

    sender(&orchestrator, &fleet)
        .send(&payload, &mut stats)
        .await
        .unwrap();

    let created = orchestrator.created.lock().unwrap();
    assert_eq!(created.len(), 3);
    assert_eq!(created[0].payload.len(), 1024);
    assert_eq!(created[1].payload.len(), 1024);
    assert_eq!(created[2].payload.len(), 452);
    let rejoined: Vec<u8> = created.iter().flat_map(|r| r.payload.clone()).collect();
    assert_eq!(rejoined, payload);
}

#[tokio::test(start_paused = true)]
async fn deployment_carries_profile_parameters() {
    let orchestrator = ScriptedOrchestrator::new(Vec::new(), status_with_devices(430, &[DEV_EUI]))
        .with_logs(DEV_EUI, Ok(complete_session_logs()));
    let fleet = devices();
    let mut stats = DownlinkStats::new();

    sender(&orchestrator, &fleet)
        .send(&[1, 2, 3], &mut stats)
        .await
        .unwrap();

    let created = orchestrator.created.lock().unwrap();
    let request = &created[0];
    assert_eq!(request.application_id, "42");
    assert_eq!(request.devices, devices());
    assert_eq!(request.multicast_dr, 9);
    assert_eq!(request.multicast_timeout, 8);
    assert_eq!(request.unicast_timeout_s, 45);
    assert_eq!(request.fragment_size, 64);
    assert_eq!(request.redundancy, 100);
    assert_eq!(request.unicast_attempt_count, 3);
}

#[tokio::test(start_paused = true)]
async fn create_failure_is_fatal() {
    struct RefusingOrchestrator;

    #[async_trait]
    impl FuotaOrchestrator for RefusingOrchestrator {
        async fn create_deployment(&self, _request: &DeploymentRequest) -> Result<String, FuotaError> {
            Err(FuotaError::OrchestratorUnavailable("refused".to_string()))
        }

        async fn deployment_status(&self, _id: &str) -> Result<DeploymentStatus, FuotaError> {
            unreachable!("no deployment was created")
        }

        async fn device_logs(&self, _id: &str, _dev_eui: &str) -> Result<Vec<LogEvent>, FuotaError> {
            unreachable!("no deployment was created")
        }
    }

    let fleet = devices();
    let mut stats = DownlinkStats::new();
    let sender = MulticastSender {
        orchestrator: &RefusingOrchestrator,
        application_id: "42",
        devices: &fleet,
        class: MulticastClass::ClassC,
        speed: DownlinkSpeed::Slow,
        region: Region::Us915,
        send_max_duration_s: 500.0,
    };

    let result = sender.send(&[1, 2, 3], &mut stats).await;
    assert!(matches!(result, Err(FuotaError::OrchestratorUnavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_poll_defers_to_uplink_confirmation() {
    // the orchestrator vanishes after creating the deployment; the send
    // moves on and leaves confirmation to the device's write response
    let orchestrator = ScriptedOrchestrator::new(
        vec![
            Err(FuotaError::OrchestratorUnavailable("502".to_string())),
            Err(FuotaError::OrchestratorUnavailable("502".to_string())),
        ],
        status_with_devices(430, &[DEV_EUI]),
    )
    .with_logs(DEV_EUI, Ok(complete_session_logs()));
    let fleet = devices();
    let mut stats = DownlinkStats::new();
    let payload = vec![0x5A; 2048];

    assert_ok!(sender(&orchestrator, &fleet).send(&payload, &mut stats).await);
    // both chunks were deployed; neither poll confirmed
    assert_eq!(orchestrator.created.lock().unwrap().len(), 2);
    assert_eq!(stats.report().deployments, 0);
}

#[tokio::test(start_paused = true)]
async fn log_fetch_failure_only_skips_that_device() {
    // one device's logs cannot be fetched; the other confirms the chunk
    let second_eui = "1112131415161718";
    let orchestrator = ScriptedOrchestrator::new(
        Vec::new(),
        status_with_devices(430, &[DEV_EUI, second_eui]),
    )
    .with_logs(DEV_EUI, Err("log service down".to_string()))
    .with_logs(second_eui, Ok(complete_session_logs()));
    let fleet = devices();
    let mut stats = DownlinkStats::new();

    assert_ok!(sender(&orchestrator, &fleet).send(&[0xAB; 10], &mut stats).await);
}

#[tokio::test(start_paused = true)]
async fn four_incomplete_devices_fail_the_send() {
    let euis = [
        "0000000000000001",
        "0000000000000002",
        "0000000000000003",
        "0000000000000004",
    ];
    let incomplete = vec![
        event("FragSessionSetupReq", &[("nb_frag", "32")]),
        event(
            "FragSessionStatusAns",
            &[("nb_frag_received", "30"), ("missing_frag", "2")],
        ),
    ];
    let mut orchestrator =
        ScriptedOrchestrator::new(Vec::new(), status_with_devices(430, &euis));
    for eui in euis {
        orchestrator = orchestrator.with_logs(eui, Ok(incomplete.clone()));
    }
    let fleet = devices();
    let mut stats = DownlinkStats::new();

    let result = sender(&orchestrator, &fleet).send(&[1, 2, 3], &mut stats).await;
    assert!(matches!(result, Err(FuotaError::DeploymentFailed(_))));
}

#[tokio::test(start_paused = true)]
async fn deadline_without_completion_times_out() {
    // the fragmentation status never completes
    let orchestrator =
        ScriptedOrchestrator::new(Vec::new(), status_with_devices(0, &[DEV_EUI]));
    let fleet = devices();
    let mut stats = DownlinkStats::new();

    let result = sender(&orchestrator, &fleet).send(&[1, 2, 3], &mut stats).await;
    match result {
        Err(FuotaError::DeploymentTimeout { elapsed_s, max_s }) => {
            assert_eq!(max_s, 500);
            assert!(elapsed_s > max_s);
        }
        other => panic!("expected DeploymentTimeout, got {other:?}"),
    }
}
