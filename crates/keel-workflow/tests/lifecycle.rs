//! Cluster lifecycle runs against in-memory collaborators

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use keel_common::retry::RetryConfig;
use keel_kubespray::{DeployAction, ProviderType};
use keel_workflow::domain::{
    ClientRegistry, Cluster, ClusterDriver, ClusterProbe, ClusterResource, ClusterStore,
    CreateMachineData, HelmChart, HelmClient, Machine, MachineDriver, ManifestApplier, Release,
    ResourceBackend,
};
use keel_workflow::workflows::{
    ApplyAddons, ClusterCreate, ClusterDelete, ClusterSync, CreateMachines, DeployMachines,
    MachineCreate, MachinePrepare, SyncStatus,
};
use keel_workflow::{
    run_workflow, ClusterStatus, Context, Error, InMemoryRuntime, MachineStatus, Payload,
    ResourceStatus, Result, TaskId, TaskRuntime,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct Records {
    clusters: HashMap<String, Cluster>,
    machines: HashMap<String, Machine>,
    version: Option<String>,
    deleted: bool,
}

#[derive(Clone, Default)]
struct FakeStore(Arc<Mutex<Records>>);

impl FakeStore {
    fn with_cluster(id: &str) -> Self {
        let store = Self::default();
        store.records().clusters.insert(
            id.to_string(),
            Cluster {
                id: id.to_string(),
                name: "imported".to_string(),
                kube_version: "v1.22.9".to_string(),
                provider: ProviderType::Onecloud,
                status: ClusterStatus::Init,
                extra_config: None,
            },
        );
        store
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Records> {
        self.0.lock().unwrap()
    }

    fn status(&self, id: &str) -> ClusterStatus {
        self.records().clusters[id].status
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get_cluster(&self, id: &str) -> Result<Cluster> {
        self.records()
            .clusters
            .get(id)
            .cloned()
            .ok_or_else(|| Error::store(id, "cluster not found"))
    }

    async fn list_machines(&self, cluster_id: &str) -> Result<Vec<Machine>> {
        Ok(self
            .records()
            .machines
            .values()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn get_machine(&self, id: &str) -> Result<Machine> {
        self.records()
            .machines
            .get(id)
            .cloned()
            .ok_or_else(|| Error::store(id, "machine not found"))
    }

    async fn set_cluster_status(&self, id: &str, status: ClusterStatus, _: &str) -> Result<()> {
        if let Some(cluster) = self.records().clusters.get_mut(id) {
            cluster.status = status;
        }
        Ok(())
    }

    async fn set_cluster_version(&self, _: &str, version: &str) -> Result<()> {
        self.records().version = Some(version.to_string());
        Ok(())
    }

    async fn generate_certificates(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn create_machine_records(
        &self,
        cluster_id: &str,
        machines: &[CreateMachineData],
    ) -> Result<Vec<Machine>> {
        let created: Vec<Machine> = machines
            .iter()
            .map(|m| Machine {
                id: m.name.clone(),
                name: m.name.clone(),
                cluster_id: cluster_id.to_string(),
                role: m.role,
                status: MachineStatus::Init,
                private_ip: None,
            })
            .collect();
        let mut records = self.records();
        for m in &created {
            records.machines.insert(m.id.clone(), m.clone());
        }
        Ok(created)
    }

    async fn set_machine_status(&self, id: &str, status: MachineStatus, _: &str) -> Result<()> {
        if let Some(machine) = self.records().machines.get_mut(id) {
            machine.status = status;
        }
        Ok(())
    }

    async fn set_machine_ip(&self, id: &str, ip: &str) -> Result<()> {
        if let Some(machine) = self.records().machines.get_mut(id) {
            machine.private_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn delete_machine_records(&self, ids: &[String]) -> Result<()> {
        let mut records = self.records();
        for id in ids {
            records.machines.remove(id);
        }
        Ok(())
    }

    async fn kubeconfig(&self, _: &str) -> Result<String> {
        Ok("apiVersion: v1\nkind: Config".to_string())
    }

    async fn real_delete(&self, cluster_id: &str) -> Result<()> {
        let mut records = self.records();
        records.clusters.remove(cluster_id);
        records.deleted = true;
        Ok(())
    }
}

/// Driver for clusters that bring their own nodes unless `provisions` is set
#[derive(Default)]
struct ImportedDriver {
    provisions: bool,
    charts_error: Option<String>,
    deploys: Mutex<Vec<DeployAction>>,
}

#[async_trait]
impl ClusterDriver for ImportedDriver {
    fn need_create_machines(&self, _: &Cluster) -> bool {
        self.provisions
    }

    async fn addons_manifest(&self, _: &Cluster) -> Result<String> {
        Ok("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: monitoring\n".to_string())
    }

    async fn addons_helm_charts(&self, _: &Cluster) -> Result<Vec<HelmChart>> {
        match &self.charts_error {
            Some(message) => Err(Error::driver("imported", message)),
            None => Ok(vec![HelmChart {
                namespace: "monitoring".to_string(),
                release: "monitor-stack".to_string(),
                chart: "stable/monitor-stack".to_string(),
                version: None,
                values: Payload::Null,
            }]),
        }
    }

    async fn request_deploy_machines(&self, _: &Cluster, action: DeployAction, _: &[Machine]) -> Result<()> {
        self.deploys.lock().unwrap().push(action);
        Ok(())
    }

    async fn request_delete_machines(&self, _: &Cluster, _: &[Machine]) -> Result<()> {
        Ok(())
    }
}

struct NoMachines;

/// Every machine comes up with an address derived from its name
struct BootingMachines;

#[async_trait]
impl MachineDriver for BootingMachines {
    async fn prepare_resource(&self, _: &Machine) -> Result<()> {
        Ok(())
    }

    async fn private_ip(&self, machine: &Machine) -> Result<String> {
        Ok(format!("10.0.0.{}", machine.name.len()))
    }

    async fn terminate_resource(&self, _: &Machine) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MachineDriver for NoMachines {
    async fn prepare_resource(&self, machine: &Machine) -> Result<()> {
        Err(Error::driver("imported", format!("cannot prepare {}", machine.name)))
    }

    async fn private_ip(&self, machine: &Machine) -> Result<String> {
        Err(Error::driver("imported", format!("no ip for {}", machine.name)))
    }

    async fn terminate_resource(&self, _: &Machine) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeHelm {
    installed: Mutex<Vec<String>>,
}

#[async_trait]
impl HelmClient for FakeHelm {
    async fn get_release(&self, _: &Cluster, _: &str, _: &str) -> Result<Option<Release>> {
        Ok(None)
    }

    async fn install(&self, _: &Cluster, chart: &HelmChart) -> Result<()> {
        self.installed.lock().unwrap().push(chart.release.clone());
        Ok(())
    }

    async fn update(&self, _: &Cluster, _: &HelmChart) -> Result<()> {
        Ok(())
    }
}

struct UpProbe;

#[async_trait]
impl ClusterProbe for UpProbe {
    async fn server_version(&self, _: &str) -> Result<String> {
        Ok("v1.22.9".to_string())
    }
}

struct CountingApplier;

#[async_trait]
impl ManifestApplier for CountingApplier {
    async fn apply(&self, _: &str, manifest: &str) -> Result<usize> {
        Ok(manifest.split("\n---").count())
    }
}

#[derive(Default)]
struct FakeRegistry {
    synced: Mutex<Vec<String>>,
}

#[async_trait]
impl ClientRegistry for FakeRegistry {
    async fn add_client(&self, _: &Cluster) -> Result<()> {
        Ok(())
    }

    async fn update_client(&self, _: &Cluster) -> Result<()> {
        Ok(())
    }

    async fn sync(&self, cluster: &Cluster) -> Result<()> {
        self.synced.lock().unwrap().push(cluster.id.clone());
        Ok(())
    }
}

struct NoResources;

#[async_trait]
impl ResourceBackend for NoResources {
    async fn get(&self, id: &str) -> Result<ClusterResource> {
        Err(Error::store(id, "resource not found"))
    }

    async fn set_status(&self, _: &str, _: ResourceStatus, _: &str) -> Result<()> {
        Ok(())
    }

    async fn remote_create(&self, _: &ClusterResource, params: &Payload) -> Result<Payload> {
        Ok(params.clone())
    }

    async fn remote_update(&self, _: &ClusterResource, params: &Payload) -> Result<Payload> {
        Ok(params.clone())
    }

    async fn remote_delete(&self, _: &ClusterResource) -> Result<()> {
        Ok(())
    }

    async fn sync(&self, _: &ClusterResource) -> Result<()> {
        Ok(())
    }

    async fn real_delete(&self, _: &ClusterResource) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    runtime: InMemoryRuntime,
    store: FakeStore,
    driver: Arc<ImportedDriver>,
    helm: Arc<FakeHelm>,
    registry: Arc<FakeRegistry>,
    ctx: Arc<Context>,
}

fn harness(driver: ImportedDriver) -> Harness {
    harness_with(driver, Arc::new(NoMachines))
}

fn harness_with(driver: ImportedDriver, machines: Arc<dyn MachineDriver>) -> Harness {
    let runtime = InMemoryRuntime::new();
    let store = FakeStore::with_cluster("c1");
    let helm = Arc::new(FakeHelm::default());
    let registry = Arc::new(FakeRegistry::default());
    let driver = Arc::new(driver);
    let ctx = Context::builder(Arc::new(runtime.clone()), Arc::new(store.clone()))
        .cluster_driver(driver.clone())
        .machine_driver(machines)
        .helm(helm.clone())
        .probe(Arc::new(UpProbe))
        .applier(Arc::new(CountingApplier))
        .registry(registry.clone())
        .resources(Arc::new(NoResources))
        .sync_status_retry(RetryConfig::fixed(2, Duration::from_millis(1)))
        .build()
        .expect("context should build");
    Harness {
        runtime,
        store,
        driver,
        helm,
        registry,
        ctx: Arc::new(ctx),
    }
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn create_without_machines_applies_addons_then_syncs_to_running() {
    let h = harness(ImportedDriver::default());

    let wf = ClusterCreate::new(h.ctx.clone(), "c1", vec![]);
    run_workflow(&wf).await.expect("create should succeed");

    assert_eq!(h.store.status("c1"), ClusterStatus::Running);
    assert_eq!(h.store.records().version.as_deref(), Some("v1.22.9"));
    assert_eq!(
        h.runtime.started_tasks(),
        vec![
            ClusterCreate::NAME,
            ApplyAddons::NAME,
            SyncStatus::NAME,
            ClusterSync::NAME
        ]
    );
    assert_eq!(*h.helm.installed.lock().unwrap(), vec!["monitor-stack"]);
    assert_eq!(*h.registry.synced.lock().unwrap(), vec!["c1"]);
    assert!(!h.runtime.is_active("c1"));
}

#[tokio::test]
async fn create_with_machines_runs_each_stage_once() {
    let h = harness_with(
        ImportedDriver {
            provisions: true,
            ..Default::default()
        },
        Arc::new(BootingMachines),
    );

    let wf = ClusterCreate::new(
        h.ctx.clone(),
        "c1",
        vec![CreateMachineData {
            name: "cp1".to_string(),
            role: keel_workflow::domain::MachineRole::Controlplane,
            config: Payload::Null,
        }],
    );
    run_workflow(&wf).await.expect("create should succeed");

    assert_eq!(
        h.runtime.started_tasks(),
        vec![
            ClusterCreate::NAME,
            CreateMachines::NAME,
            MachineCreate::NAME,
            MachinePrepare::NAME,
            DeployMachines::NAME,
            ApplyAddons::NAME,
            SyncStatus::NAME,
            ClusterSync::NAME
        ]
    );
    assert_eq!(*h.driver.deploys.lock().unwrap(), vec![DeployAction::Create]);
    assert_eq!(*h.helm.installed.lock().unwrap(), vec!["monitor-stack"]);
    assert_eq!(*h.registry.synced.lock().unwrap(), vec!["c1"]);
    assert_eq!(h.store.status("c1"), ClusterStatus::Running);
    assert_eq!(
        h.store.records().machines["cp1"].private_ip.as_deref(),
        Some("10.0.0.3")
    );
}

#[tokio::test]
async fn addons_failure_leaves_apply_addons_fail_and_stops() {
    let h = harness(ImportedDriver {
        charts_error: Some("chart repo unreachable".to_string()),
        ..Default::default()
    });

    let wf = ClusterCreate::new(h.ctx.clone(), "c1", vec![]);
    let err = run_workflow(&wf).await.unwrap_err();

    assert!(err.to_string().contains("chart repo unreachable"));
    assert_eq!(h.store.status("c1"), ClusterStatus::ApplyAddonsFail);
    assert!(!h.runtime.started_tasks().contains(&SyncStatus::NAME));
    assert!(h.registry.synced.lock().unwrap().is_empty());
    assert!(!h.runtime.is_active("c1"));
}

#[tokio::test]
async fn create_on_a_busy_cluster_is_refused_without_side_effects() {
    let h = harness(ImportedDriver::default());
    let holder = TaskId::new(ClusterDelete::NAME, "c1");
    let _held = h.runtime.begin(&holder).await.expect("slot should be free");

    let wf = ClusterCreate::new(h.ctx.clone(), "c1", vec![]);
    assert!(run_workflow(&wf).await.is_err());

    assert_eq!(h.store.status("c1"), ClusterStatus::Init);
    assert!(h.helm.installed.lock().unwrap().is_empty());
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn delete_without_machines_removes_the_record() {
    let h = harness(ImportedDriver::default());

    let wf = ClusterDelete::new(h.ctx.clone(), "c1");
    run_workflow(&wf).await.expect("delete should succeed");

    assert!(h.store.records().deleted);
    assert!(h.store.records().clusters.is_empty());
}
