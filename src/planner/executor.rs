//! Plan executor for applying plans against the backend.
//!
//! Actions run one at a time in plan order. After every action the observed
//! outcome is recorded in the state and the state is saved, so an
//! interrupted run never loses an identifier the backend handed out.

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::config::Manifest;
use crate::error::{ConfigError, Result, StackformError};
use crate::reconcile::ApiContext;
use crate::resources::{ResourceRegistry, ResourceState};
use crate::state::{HistoryEntry, HistoryOperation, StackState, StateStore};

use super::plan::{ActionType, Plan, PlannedAction};
use super::references::resolve_fields;

/// Executor for plans.
pub struct PlanExecutor<'a> {
    /// Lifecycles by type tag.
    registry: &'a ResourceRegistry,
    /// Backend context.
    ctx: &'a ApiContext,
    /// Where state is saved after each action.
    store: &'a dyn StateStore,
    /// Whether to continue on errors.
    continue_on_error: bool,
}

/// Result of executing a single action.
#[derive(Debug)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Whether the action succeeded.
    pub success: bool,
    /// Identifier recorded after the action, if any.
    pub id: Option<String>,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Total actions executed.
    pub total_executed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of actions not run after a failure.
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
}

/// Result of refreshing state from the backend.
#[derive(Debug, Default)]
pub struct RefreshResult {
    /// Resources read successfully and still present.
    pub refreshed: Vec<String>,
    /// Resources that no longer exist and were dropped from state.
    pub vanished: Vec<String>,
    /// Resources whose read failed, with the error.
    pub errors: Vec<(String, String)>,
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("state", &self.store.location())
            .field("continue_on_error", &self.continue_on_error)
            .finish_non_exhaustive()
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(
        registry: &'a ResourceRegistry,
        ctx: &'a ApiContext,
        store: &'a dyn StateStore,
    ) -> Self {
        Self {
            registry,
            ctx,
            store,
            continue_on_error: false,
        }
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a plan built from `manifest`.
    ///
    /// Failed actions are reported in the result; the manifest hash is only
    /// recorded when every action succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    pub async fn execute(
        &self,
        plan: &Plan,
        manifest: &Manifest,
        state: &mut StackState,
    ) -> Result<ExecutionResult> {
        self.run(plan, manifest, state, HistoryOperation::Apply).await
    }

    /// Deletes every resource in state, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    pub async fn destroy(&self, state: &mut StackState) -> Result<ExecutionResult> {
        let plan = Plan::destroy(state);
        let result = self
            .run(&plan, &Manifest::default(), state, HistoryOperation::Destroy)
            .await?;
        if result.success {
            state.manifest_hash.clear();
            self.store.save(state).await?;
        }
        Ok(result)
    }

    /// Reads every resource in state and records what the backend reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    pub async fn refresh(&self, state: &mut StackState) -> Result<RefreshResult> {
        let mut result = RefreshResult::default();
        let addresses: Vec<String> = state
            .addresses_in_creation_order()
            .into_iter()
            .map(String::from)
            .collect();

        for address in addresses {
            let Some(record) = state.get(&address).cloned() else {
                continue;
            };
            let outcome = async {
                let handler = self.registry.get(&record.resource_type)?;
                let mut observed = record.to_resource_state();
                let read = handler.read(self.ctx, &mut observed).await;
                Ok::<_, StackformError>((observed, read))
            }
            .await;

            match outcome {
                Ok((observed, Ok(()))) => {
                    if observed.is_absent() {
                        warn!("{address} no longer exists, removing it from state");
                        result.vanished.push(address.clone());
                    } else {
                        result.refreshed.push(address.clone());
                    }
                    state.record(&record.resource_type, &record.name, &observed);
                }
                Ok((_, Err(e))) | Err(e) => {
                    error!("Failed to refresh {address}: {e}");
                    result.errors.push((address.clone(), e.to_string()));
                }
            }
        }

        let mut addresses = result.refreshed.clone();
        addresses.extend(result.vanished.iter().cloned());
        let entry = if result.errors.is_empty() {
            HistoryEntry::new(HistoryOperation::Refresh, &state.manifest_hash, addresses)
        } else {
            HistoryEntry::failed(
                HistoryOperation::Refresh,
                &state.manifest_hash,
                addresses,
                &format!("{} reads failed", result.errors.len()),
            )
        };
        state.add_history(entry);
        self.store.save(state).await?;

        Ok(result)
    }

    async fn run(
        &self,
        plan: &Plan,
        manifest: &Manifest,
        state: &mut StackState,
        operation: HistoryOperation,
    ) -> Result<ExecutionResult> {
        info!("Executing plan with {} actions", plan.actions.len());

        if plan.actions.is_empty() {
            return Ok(ExecutionResult {
                success: true,
                ..ExecutionResult::default()
            });
        }

        let mut results = Vec::new();

        for (idx, action) in plan.actions.iter().enumerate() {
            info!("Executing action {}: {}", idx, action.description());

            let outcome = self.execute_action(action, manifest, state).await;
            self.store.save(state).await?;

            let address = action.address();
            let id = state.get(&address).map(|r| r.id.clone());
            let result = match outcome {
                Ok(()) => ActionResult {
                    index: idx,
                    action: action.clone(),
                    success: true,
                    id,
                    error: None,
                },
                Err(e) => {
                    error!("Failed to {} {}: {}", action.action_type, address, e);
                    ActionResult {
                        index: idx,
                        action: action.clone(),
                        success: false,
                        id,
                        error: Some(e.to_string()),
                    }
                }
            };

            let stop = !result.success && !self.continue_on_error;
            results.push(result);
            if stop {
                break;
            }
        }

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        let execution_result = ExecutionResult {
            total_executed: results.len(),
            successful,
            failed,
            skipped: plan.actions.len() - results.len(),
            success: failed == 0 && results.len() == plan.actions.len(),
            results,
        };

        let history_entry = if execution_result.success {
            state.manifest_hash.clone_from(&plan.manifest_hash);
            HistoryEntry::new(operation, &plan.manifest_hash, plan.addresses())
        } else {
            HistoryEntry::failed(
                operation,
                &plan.manifest_hash,
                plan.addresses(),
                &format!("{} actions failed", execution_result.failed),
            )
        };
        state.add_history(history_entry);
        self.store.save(state).await?;

        Ok(execution_result)
    }

    /// Executes a single action, recording its outcome in `state`.
    async fn execute_action(
        &self,
        action: &PlannedAction,
        manifest: &Manifest,
        state: &mut StackState,
    ) -> Result<()> {
        match action.action_type {
            ActionType::Create => self.execute_create(action, manifest, state).await,
            ActionType::Update => self.execute_update(action, manifest, state).await,
            ActionType::Replace => {
                self.execute_delete(action, state).await?;
                self.execute_create(action, manifest, state).await
            }
            ActionType::Delete => self.execute_delete(action, state).await,
        }
    }

    /// Resolves the manifest's declared fields against current state.
    fn declared_fields(
        action: &PlannedAction,
        manifest: &Manifest,
        state: &StackState,
    ) -> Result<Map<String, Value>> {
        let address = action.address();
        let resource = manifest.resource(&address).ok_or_else(|| {
            StackformError::internal(format!("{address} is not declared in the manifest"))
        })?;
        resolve_fields(&resource.fields, state)
    }

    async fn execute_create(
        &self,
        action: &PlannedAction,
        manifest: &Manifest,
        state: &mut StackState,
    ) -> Result<()> {
        let handler = self.registry.get(&action.resource_type)?;
        let fields = Self::declared_fields(action, manifest, state)?;

        let mut resource = ResourceState::planned(Value::Object(fields));
        let outcome = handler.create(self.ctx, &mut resource).await;
        state.record(&action.resource_type, &action.name, &resource);

        if outcome.is_ok() {
            info!("Created {} (ID: {})", action.address(), resource.id);
        } else if !resource.is_absent() {
            warn!(
                "{} was created as {} but did not finish; it stays in state",
                action.address(),
                resource.id
            );
        }
        outcome
    }

    async fn execute_update(
        &self,
        action: &PlannedAction,
        manifest: &Manifest,
        state: &mut StackState,
    ) -> Result<()> {
        let address = action.address();
        let handler = self.registry.get(&action.resource_type)?;
        let declared = Self::declared_fields(action, manifest, state)?;
        let record = state
            .get(&address)
            .ok_or_else(|| ConfigError::UnresolvedReference {
                reference: address.clone(),
                reason: String::from("resource is not in state"),
            })?;

        let mut resource = record.to_resource_state();
        let mut desired = resource.fields.as_object().cloned().unwrap_or_default();
        desired.extend(declared);

        let outcome = handler
            .update(self.ctx, &mut resource, &Value::Object(desired))
            .await;
        state.record(&action.resource_type, &action.name, &resource);
        outcome
    }

    async fn execute_delete(&self, action: &PlannedAction, state: &mut StackState) -> Result<()> {
        let address = action.address();
        let Some(record) = state.get(&address) else {
            info!("{address} is not in state, nothing to delete");
            return Ok(());
        };

        let handler = self.registry.get(&action.resource_type)?;
        let mut resource = record.to_resource_state();
        let outcome = handler.delete(self.ctx, &mut resource).await;
        state.record(&action.resource_type, &action.name, &resource);
        outcome
    }
}

impl ExecutionResult {
    /// Returns true if all actions succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed, self.successful, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHasher, ConfigParser};
    use crate::planner::DiffEngine;
    use crate::state::LocalStateStore;
    use crate::testing::{FakeTransport, context};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MANIFEST: &str = r"
resources:
  - type: ip_address
    name: front
    fields:
      zone_id: z-1
  - type: firewall_rule
    name: https
    fields:
      ip_address_id: ${ip_address.front.id}
      protocol: tcp
      cidr_list: [0.0.0.0/0]
      start_port: 443
";

    struct Harness {
        transport: Arc<FakeTransport>,
        ctx: ApiContext,
        registry: ResourceRegistry,
        store: LocalStateStore,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let transport = FakeTransport::new();
            Self {
                ctx: context(&transport),
                transport,
                registry: ResourceRegistry::builtin(),
                store: LocalStateStore::with_base_dir(dir.path().join(".stackform")),
                _dir: dir,
            }
        }

        fn executor(&self) -> PlanExecutor<'_> {
            PlanExecutor::new(&self.registry, &self.ctx, &self.store)
        }

        fn plan(&self, manifest: &Manifest, state: &StackState) -> Plan {
            let diff = DiffEngine::new(&self.registry)
                .compute_diff(manifest, state)
                .unwrap();
            Plan::from_diff(&diff, &ConfigHasher::new().hash_manifest(manifest))
        }
    }

    fn manifest(yaml: &str) -> Manifest {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn script_backend(transport: &FakeTransport) {
        transport
            .reply("associateIpAddress", json!({"ipaddress": {"id": "ip-1"}}))
            .reply(
                "listPublicIpAddresses",
                json!({"publicipaddress": [{"id": "ip-1", "ipaddress": "203.0.113.7", "zoneid": "z-1"}]}),
            )
            .reply("createFirewallRule", json!({"firewallrule": {"id": "fw-1"}}))
            .reply(
                "listFirewallRules",
                json!({"firewallrule": [{
                    "id": "fw-1", "ipaddressid": "ip-1", "protocol": "tcp",
                    "cidrlist": "0.0.0.0/0", "startport": 443, "endport": 443
                }]}),
            );
    }

    #[tokio::test]
    async fn test_apply_resolves_references_and_persists_state() {
        let h = Harness::new();
        script_backend(&h.transport);
        let manifest = manifest(MANIFEST);
        let mut state = StackState::new();

        let plan = h.plan(&manifest, &state);
        let result = h.executor().execute(&plan, &manifest, &mut state).await.unwrap();

        assert!(result.all_successful(), "{result}");
        let create = &h.transport.calls_to("createFirewallRule")[0];
        assert_eq!(create.get("ipaddressid"), Some("ip-1"));
        assert_eq!(state.get("firewall_rule.https").unwrap().id, "fw-1");
        assert_eq!(state.manifest_hash, plan.manifest_hash);

        let saved = h.store.load().await.unwrap().unwrap();
        assert_eq!(saved.resources.len(), 2);
        assert_eq!(saved.history.len(), 1);

        // A second plan over the recorded state has nothing to do.
        assert!(h.plan(&manifest, &state).is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_unless_continue_on_error() {
        let h = Harness::new();
        h.transport.fail("associateIpAddress", "no capacity");
        let manifest = manifest(MANIFEST);

        let mut state = StackState::new();
        let plan = h.plan(&manifest, &state);
        let result = h.executor().execute(&plan, &manifest, &mut state).await.unwrap();
        assert_eq!((result.failed, result.skipped), (1, 1));
        assert!(state.resources.is_empty());
        assert!(state.manifest_hash.is_empty());
        assert!(!state.history[0].success);

        let mut state = StackState::new();
        let result = h
            .executor()
            .with_continue_on_error(true)
            .execute(&plan, &manifest, &mut state)
            .await
            .unwrap();
        assert_eq!((result.failed, result.skipped), (2, 0));
        let second = result.results[1].error.as_deref().unwrap();
        assert!(second.contains("ip_address.front"), "{second}");
    }

    #[tokio::test]
    async fn test_update_overlays_declared_fields_on_recorded_ones() {
        let h = Harness::new();
        h.transport.reply(
            "listNetworks",
            json!({"network": [{
                "id": "net-1", "name": "web", "displaytext": "Web tier",
                "networkofferingid": "no-1", "zoneid": "z-1", "cidr": "10.1.1.0/24"
            }]}),
        );
        let mut state = StackState::new();
        state.record(
            "network",
            "web",
            &ResourceState {
                id: String::from("net-1"),
                fields: json!({
                    "name": "web", "display_text": "web", "network_offering_id": "no-1",
                    "zone_id": "z-1", "cidr": "10.1.1.0/24"
                }),
            },
        );

        let manifest = manifest(
            "resources:\n  - type: network\n    name: web\n    fields: {name: web, display_text: Web tier, zone_id: z-1}\n",
        );
        let plan = h.plan(&manifest, &state);
        assert_eq!(plan.count(ActionType::Update), 1);

        let result = h.executor().execute(&plan, &manifest, &mut state).await.unwrap();
        assert!(result.success);
        let update = &h.transport.calls_to("updateNetwork")[0];
        assert_eq!(update.get("displaytext"), Some("Web tier"));
        assert_eq!(state.get("network.web").unwrap().fields["display_text"], json!("Web tier"));
    }

    #[tokio::test]
    async fn test_destroy_deletes_newest_first() {
        let h = Harness::new();
        script_backend(&h.transport);
        let manifest = manifest(MANIFEST);
        let mut state = StackState::new();
        let plan = h.plan(&manifest, &state);
        h.executor().execute(&plan, &manifest, &mut state).await.unwrap();

        h.transport
            .reply("listFirewallRules", json!({}))
            .reply("listPublicIpAddresses", json!({}));
        h.transport.clear_calls();

        let result = h.executor().destroy(&mut state).await.unwrap();
        assert!(result.success, "{result}");
        let deletes: Vec<_> = h
            .transport
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("delete") || c.starts_with("disassociate"))
            .collect();
        assert_eq!(deletes, vec!["deleteFirewallRule", "disassociateIpAddress"]);
        assert!(state.resources.is_empty());
        assert!(state.manifest_hash.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_resources() {
        let h = Harness::new();
        h.transport.reply(
            "listPublicIpAddresses",
            json!({"publicipaddress": [{"id": "ip-1", "ipaddress": "203.0.113.9", "zoneid": "z-1"}]}),
        );

        let mut state = StackState::new();
        state.record(
            "ip_address",
            "front",
            &ResourceState {
                id: String::from("ip-1"),
                fields: json!({"zone_id": "z-1"}),
            },
        );
        state.record(
            "firewall_rule",
            "https",
            &ResourceState {
                id: String::from("fw-1"),
                fields: json!({"ip_address_id": "ip-1", "protocol": "tcp"}),
            },
        );

        let result = h.executor().refresh(&mut state).await.unwrap();
        assert_eq!(result.refreshed, vec!["ip_address.front"]);
        assert_eq!(result.vanished, vec!["firewall_rule.https"]);
        assert_eq!(
            state.get("ip_address.front").unwrap().fields["ip_address"],
            json!("203.0.113.9")
        );
        assert!(state.get("firewall_rule.https").is_none());
    }
}
