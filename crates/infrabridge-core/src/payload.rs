//! Bodies of the API calls and replies exchanged on the bus.

use crate::{CoreError, RequestStatus, Result, WrapperCategory, WrapperConfiguration};
use serde::{Deserialize, Serialize};

/// `infrastructure.management.<category>.add`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddBackendPayload {
    #[serde(alias = "wim_vendor")]
    pub vim_type: String,
    #[serde(alias = "wim_address")]
    pub vim_address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, alias = "password")]
    pub pass: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl AddBackendPayload {
    pub fn into_configuration(self, category: WrapperCategory) -> WrapperConfiguration {
        let configuration = if self.configuration.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.configuration
        };
        let mut config = WrapperConfiguration::new(category, self.vim_type, self.vim_address)
            .with_credentials(self.username, self.pass)
            .with_location(self.name, self.city, self.country)
            .with_configuration(configuration);
        config.domain = self.domain;
        config
    }
}

/// `infrastructure.management.<category>.remove`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBackendPayload {
    #[serde(alias = "vim_uuid", alias = "wim_uuid")]
    pub uuid: String,
}

/// `infrastructure.management.wan.attach`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachVimPayload {
    pub wim_uuid: String,
    pub vim_uuid: String,
    pub vim_address: String,
}

/// `infrastructure.management.compute.resourceAvailability`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAvailabilityPayload {
    pub vim_uuid: String,
    #[serde(default)]
    pub cores: Option<i64>,
    #[serde(default)]
    pub memory: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VimPreparation {
    pub uuid: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// `infrastructure.service.prepare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePreparePayload {
    pub instance_id: String,
    pub vim_list: Vec<VimPreparation>,
}

/// `infrastructure.service.remove`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRemovePayload {
    #[serde(alias = "service_instance_id")]
    pub instance_uuid: String,
}

/// Body of the SUCCESS update a compute backend emits for one removal branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBranchOutcome {
    pub status: String,
    pub wrapper_uuid: String,
}

/// `infrastructure.function.deploy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeployPayload {
    pub vim_uuid: String,
    pub service_instance_id: String,
    pub vnfd: serde_json::Value,
    #[serde(default)]
    pub public_key: Option<String>,
}

impl FunctionDeployPayload {
    /// Instance id carried by the descriptor, if any.
    pub fn function_instance_id(&self) -> Option<&str> {
        self.vnfd.get("instance_uuid").and_then(|v| v.as_str())
    }

    pub fn function_name(&self) -> &str {
        self.vnfd
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("function")
    }
}

/// `infrastructure.function.scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionScalePayload {
    pub vim_uuid: String,
    pub service_instance_id: String,
    pub function_instance_id: String,
    #[serde(default)]
    pub vnfd: serde_json::Value,
    #[serde(default = "default_instances")]
    pub number_of_instances: u32,
}

fn default_instances() -> u32 {
    1
}

/// `infrastructure.cloud_service.deploy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudServiceDeployPayload {
    pub vim_uuid: String,
    pub service_instance_id: String,
    pub csd: serde_json::Value,
}

impl CloudServiceDeployPayload {
    pub fn cloud_service_instance_id(&self) -> Option<&str> {
        self.csd.get("instance_uuid").and_then(|v| v.as_str())
    }
}

/// Reply to function deploy/scale and cloud service deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployResponse {
    pub request_status: RequestStatus,
    pub instance_vim_uuid: String,
    pub instance_name: String,
    pub vim_uuid: String,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub message: String,
}

/// `infrastructure.service.chain.configure`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfigurePayload {
    pub service_instance_id: String,
    #[serde(default)]
    pub nsd: serde_json::Value,
    #[serde(default)]
    pub vnfds: Vec<serde_json::Value>,
    #[serde(default)]
    pub vnfrs: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nap: Option<serde_json::Value>,
}

impl NetworkConfigurePayload {
    /// Forwarding graphs and function ids of the service descriptor.
    pub fn service_graph(&self) -> Result<ServiceGraph> {
        if self.nsd.is_null() {
            return Ok(ServiceGraph::default());
        }
        serde_json::from_value(self.nsd.clone())
            .map_err(|e| CoreError::Parse(format!("nsd: {e}")))
    }

    /// Descriptor of the function named `name`.
    pub fn vnfd_named(&self, name: &str) -> Option<&serde_json::Value> {
        self.vnfds
            .iter()
            .find(|vnfd| vnfd.get("name").and_then(|v| v.as_str()) == Some(name))
    }

    /// Record whose `descriptor_reference` is the uuid of `vnfd`.
    pub fn vnfr_for(&self, vnfd: &serde_json::Value) -> Option<&serde_json::Value> {
        let uuid = vnfd.get("uuid").and_then(|v| v.as_str())?;
        self.vnfrs.iter().find(|vnfr| {
            vnfr.get("descriptor_reference").and_then(|v| v.as_str()) == Some(uuid)
        })
    }

    /// Copy of this payload restricted to one forwarding path over `points`.
    ///
    /// The descriptor keeps its other fields; `vnfds` and `vnfrs` keep only
    /// the functions the points belong to.
    pub fn partial(
        &self,
        points: Vec<ConnectionPointRef>,
        vnfds: Vec<serde_json::Value>,
    ) -> NetworkConfigurePayload {
        let mut nsd = match &self.nsd {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        nsd.insert(
            "instance_uuid".to_string(),
            serde_json::Value::String(self.service_instance_id.clone()),
        );
        nsd.insert(
            "forwarding_graphs".to_string(),
            serde_json::json!([{ "network_forwarding_paths": [{ "connection_points": points }] }]),
        );

        let mut vnfrs: Vec<serde_json::Value> = Vec::new();
        for vnfd in &vnfds {
            if let Some(vnfr) = self.vnfr_for(vnfd) {
                if !vnfrs.contains(vnfr) {
                    vnfrs.push(vnfr.clone());
                }
            }
        }

        NetworkConfigurePayload {
            service_instance_id: self.service_instance_id.clone(),
            nsd: serde_json::Value::Object(nsd),
            vnfds,
            vnfrs,
            nap: self.nap.clone(),
        }
    }
}

/// The part of a service descriptor that describes its chaining.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGraph {
    #[serde(default)]
    pub network_functions: Vec<NetworkFunctionRef>,
    #[serde(default)]
    pub forwarding_graphs: Vec<ForwardingGraph>,
}

impl ServiceGraph {
    pub fn function_name(&self, vnf_id: &str) -> Option<&str> {
        self.network_functions
            .iter()
            .find(|nf| nf.vnf_id == vnf_id)
            .map(|nf| nf.vnf_name.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &ForwardingPath> {
        self.forwarding_graphs
            .iter()
            .flat_map(|graph| graph.network_forwarding_paths.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFunctionRef {
    pub vnf_id: String,
    pub vnf_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardingGraph {
    #[serde(default)]
    pub network_forwarding_paths: Vec<ForwardingPath>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardingPath {
    #[serde(default)]
    pub connection_points: Vec<ConnectionPointRef>,
}

impl ForwardingPath {
    /// Connection points in path order.
    pub fn ordered(&self) -> Vec<ConnectionPointRef> {
        let mut points = self.connection_points.clone();
        points.sort_by_key(|p| p.position);
        points
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPointRef {
    pub connection_point_ref: String,
    #[serde(default)]
    pub position: u32,
}

/// How a connection point reference names its function.
#[derive(Debug, PartialEq, Eq)]
pub enum PointOwner<'a> {
    /// A service-level point such as `input`, not owned by a function.
    Service,
    Function { vnf_id: &'a str, point: &'a str },
    Malformed,
}

impl ConnectionPointRef {
    pub fn owner(&self) -> PointOwner<'_> {
        let name = self.connection_point_ref.as_str();
        if !name.contains(':') {
            return PointOwner::Service;
        }
        let mut parts = name.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(vnf_id), Some(point), None) => PointOwner::Function { vnf_id, point },
            _ => PointOwner::Malformed,
        }
    }
}

/// `infrastructure.service.chain.deconfigure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDeconfigurePayload {
    pub service_instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VimRef {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NapEndpoint {
    #[serde(default)]
    pub location: String,
    pub nap: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Nap {
    #[serde(default)]
    pub ingresses: Vec<NapEndpoint>,
    #[serde(default)]
    pub egresses: Vec<NapEndpoint>,
}

/// `infrastructure.wan.configure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanConfigurePayload {
    pub instance_id: String,
    pub vim_list: Vec<VimRef>,
    #[serde(default)]
    pub nap: Option<Nap>,
}

/// `infrastructure.wan.deconfigure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanDeconfigurePayload {
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RegistrationResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregistrationRequest {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregistrationResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub uuid: String,
    pub state: String,
}
