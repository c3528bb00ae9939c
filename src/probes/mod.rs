//! OS- and cluster-facing collaborators (C2/C3). Neither talks to a real OS
//! or cluster in this crate — both are trait contracts the observers are
//! written against, plus fake implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("process {0} has exited")]
    ProcessVanished(u32),
    #[error("probe call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryInfo {
    pub total_mb: f64,
    pub used_mb: f64,
    pub used_pct: f64,
}

#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub name: String,
    pub total_mb: f64,
    pub available_mb: f64,
}

/// Host/process resource probe. A real implementation reads `/proc`,
/// `GetProcessMemoryInfo`, or similar; tests use `FakeOsProbe`.
pub trait OsProbe: Send + Sync {
    fn node_cpu_percent(&self) -> Result<f64, ProbeError>;
    fn node_memory_info(&self) -> Result<MemoryInfo, ProbeError>;
    fn active_tcp_port_count(&self) -> Result<u32, ProbeError>;
    fn active_ephemeral_tcp_port_count(&self) -> Result<u32, ProbeError>;
    fn firewall_rules_count(&self) -> Result<u32, ProbeError>;

    fn process_cpu_percent(&self, pid: u32) -> Result<f64, ProbeError>;
    fn process_private_working_set_mb(&self, pid: u32) -> Result<f64, ProbeError>;
    fn process_active_port_count(&self, pid: u32) -> Result<u32, ProbeError>;
    fn process_active_ephemeral_port_count(&self, pid: u32) -> Result<u32, ProbeError>;
    fn child_pids(&self, pid: u32) -> Result<Vec<u32>, ProbeError>;
    fn process_exists(&self, pid: u32) -> bool;

    fn enumerate_fixed_drives(&self) -> Result<Vec<DriveInfo>, ProbeError>;
    fn disk_space_used_percent(&self, drive: &str) -> Result<f64, ProbeError>;
    fn avg_disk_queue_length(&self, drive: &str) -> Result<f64, ProbeError>;
}

/// A replica's role within its partition. Only `Primary` and `Stateless`
/// replicas run application code worth sampling; `ActiveSecondary` exists to
/// keep the model honest, not to be monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    Primary,
    ActiveSecondary,
    Stateless,
}

#[derive(Debug, Clone)]
pub struct DeployedReplica {
    pub application_name: String,
    pub service_name: String,
    pub host_process_id: u32,
    pub role: ReplicaRole,
}

#[derive(Debug, Clone)]
pub struct DeployedCodePackage {
    pub application_name: String,
    pub service_package_name: String,
    pub entry_point_pid: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ClusterQueryError {
    #[error("cluster query timed out")]
    Timeout,
    #[error("cluster query failed: {0}")]
    Failed(String),
}

/// Cluster management API collaborator. A real implementation talks to the
/// local node's management endpoint; tests use `FakeClusterQueryClient`.
pub trait ClusterQueryClient: Send + Sync {
    fn get_deployed_applications_on_node(&self, node_name: &str) -> Result<Vec<String>, ClusterQueryError>;
    fn get_deployed_replicas_on_node(
        &self,
        node_name: &str,
        application_name: &str,
    ) -> Result<Vec<DeployedReplica>, ClusterQueryError>;
    fn get_deployed_code_packages_on_node(
        &self,
        node_name: &str,
        application_name: &str,
    ) -> Result<Vec<DeployedCodePackage>, ClusterQueryError>;
    fn get_cluster_manifest_xml(&self) -> Result<String, ClusterQueryError>;
}

/// Deterministic in-memory probe for tests: fixed readings unless overridden.
pub struct FakeOsProbe {
    pub cpu_percent: Mutex<f64>,
    pub memory: Mutex<MemoryInfo>,
    pub active_ports: Mutex<u32>,
    pub ephemeral_ports: Mutex<u32>,
    pub firewall_rules: Mutex<u32>,
    pub process_cpu: Mutex<HashMap<u32, f64>>,
    pub process_mem_mb: Mutex<HashMap<u32, f64>>,
    pub process_ports: Mutex<HashMap<u32, u32>>,
    pub process_ephemeral_ports: Mutex<HashMap<u32, u32>>,
    pub children: Mutex<HashMap<u32, Vec<u32>>>,
    pub alive: Mutex<HashMap<u32, bool>>,
    pub drives: Mutex<Vec<DriveInfo>>,
    pub disk_used_pct: Mutex<HashMap<String, f64>>,
    pub disk_queue_len: Mutex<HashMap<String, f64>>,
}

impl FakeOsProbe {
    pub fn new() -> Self {
        Self {
            cpu_percent: Mutex::new(0.0),
            memory: Mutex::new(MemoryInfo::default()),
            active_ports: Mutex::new(0),
            ephemeral_ports: Mutex::new(0),
            firewall_rules: Mutex::new(0),
            process_cpu: Mutex::new(HashMap::new()),
            process_mem_mb: Mutex::new(HashMap::new()),
            process_ports: Mutex::new(HashMap::new()),
            process_ephemeral_ports: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            alive: Mutex::new(HashMap::new()),
            drives: Mutex::new(Vec::new()),
            disk_used_pct: Mutex::new(HashMap::new()),
            disk_queue_len: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_process_cpu(&self, pid: u32, value: f64) {
        self.process_cpu.lock().unwrap().insert(pid, value);
        self.alive.lock().unwrap().insert(pid, true);
    }

    pub fn set_process_mem_mb(&self, pid: u32, value: f64) {
        self.process_mem_mb.lock().unwrap().insert(pid, value);
        self.alive.lock().unwrap().insert(pid, true);
    }

    pub fn set_process_ports(&self, pid: u32, active: u32, ephemeral: u32) {
        self.process_ports.lock().unwrap().insert(pid, active);
        self.process_ephemeral_ports.lock().unwrap().insert(pid, ephemeral);
        self.alive.lock().unwrap().insert(pid, true);
    }

    pub fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid, false);
    }
}

impl Default for FakeOsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl OsProbe for FakeOsProbe {
    fn node_cpu_percent(&self) -> Result<f64, ProbeError> {
        Ok(*self.cpu_percent.lock().unwrap())
    }

    fn node_memory_info(&self) -> Result<MemoryInfo, ProbeError> {
        Ok(*self.memory.lock().unwrap())
    }

    fn active_tcp_port_count(&self) -> Result<u32, ProbeError> {
        Ok(*self.active_ports.lock().unwrap())
    }

    fn active_ephemeral_tcp_port_count(&self) -> Result<u32, ProbeError> {
        Ok(*self.ephemeral_ports.lock().unwrap())
    }

    fn firewall_rules_count(&self) -> Result<u32, ProbeError> {
        Ok(*self.firewall_rules.lock().unwrap())
    }

    fn process_cpu_percent(&self, pid: u32) -> Result<f64, ProbeError> {
        if !self.process_exists(pid) {
            return Err(ProbeError::ProcessVanished(pid));
        }
        Ok(*self.process_cpu.lock().unwrap().get(&pid).unwrap_or(&0.0))
    }

    fn process_private_working_set_mb(&self, pid: u32) -> Result<f64, ProbeError> {
        if !self.process_exists(pid) {
            return Err(ProbeError::ProcessVanished(pid));
        }
        Ok(*self.process_mem_mb.lock().unwrap().get(&pid).unwrap_or(&0.0))
    }

    fn process_active_port_count(&self, pid: u32) -> Result<u32, ProbeError> {
        Ok(*self.process_ports.lock().unwrap().get(&pid).unwrap_or(&0))
    }

    fn process_active_ephemeral_port_count(&self, pid: u32) -> Result<u32, ProbeError> {
        Ok(*self.process_ephemeral_ports.lock().unwrap().get(&pid).unwrap_or(&0))
    }

    fn child_pids(&self, pid: u32) -> Result<Vec<u32>, ProbeError> {
        Ok(self.children.lock().unwrap().get(&pid).cloned().unwrap_or_default())
    }

    fn process_exists(&self, pid: u32) -> bool {
        *self.alive.lock().unwrap().get(&pid).unwrap_or(&true)
    }

    fn enumerate_fixed_drives(&self) -> Result<Vec<DriveInfo>, ProbeError> {
        Ok(self.drives.lock().unwrap().clone())
    }

    fn disk_space_used_percent(&self, drive: &str) -> Result<f64, ProbeError> {
        Ok(*self.disk_used_pct.lock().unwrap().get(drive).unwrap_or(&0.0))
    }

    fn avg_disk_queue_length(&self, drive: &str) -> Result<f64, ProbeError> {
        Ok(*self.disk_queue_len.lock().unwrap().get(drive).unwrap_or(&0.0))
    }
}

/// Scriptable cluster client for tests: returns whatever was configured, with
/// no simulated network behavior.
pub struct FakeClusterQueryClient {
    pub applications: Mutex<Vec<String>>,
    pub replicas: Mutex<HashMap<String, Vec<DeployedReplica>>>,
    pub code_packages: Mutex<HashMap<String, Vec<DeployedCodePackage>>>,
}

impl FakeClusterQueryClient {
    pub fn new() -> Self {
        Self {
            applications: Mutex::new(Vec::new()),
            replicas: Mutex::new(HashMap::new()),
            code_packages: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FakeClusterQueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterQueryClient for FakeClusterQueryClient {
    fn get_deployed_applications_on_node(&self, _node_name: &str) -> Result<Vec<String>, ClusterQueryError> {
        Ok(self.applications.lock().unwrap().clone())
    }

    fn get_deployed_replicas_on_node(
        &self,
        _node_name: &str,
        application_name: &str,
    ) -> Result<Vec<DeployedReplica>, ClusterQueryError> {
        Ok(self
            .replicas
            .lock()
            .unwrap()
            .get(application_name)
            .cloned()
            .unwrap_or_default())
    }

    fn get_deployed_code_packages_on_node(
        &self,
        _node_name: &str,
        application_name: &str,
    ) -> Result<Vec<DeployedCodePackage>, ClusterQueryError> {
        Ok(self
            .code_packages
            .lock()
            .unwrap()
            .get(application_name)
            .cloned()
            .unwrap_or_default())
    }

    fn get_cluster_manifest_xml(&self) -> Result<String, ClusterQueryError> {
        Ok("<ClusterManifest/>".to_string())
    }
}
