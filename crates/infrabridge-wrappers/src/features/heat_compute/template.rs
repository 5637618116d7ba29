//! HOT templates for service networks and function server groups.

use crate::{Result, WrapperError};
use infrabridge_core::subnet::gateway;
use serde_json::{json, Map, Value};

const HOT_VERSION: &str = "2015-04-30";
const NETWORK_ROLES: [&str; 5] = ["mgmt", "input", "output", "data1", "data2"];

pub fn network_resource_name(instance_id: &str, index: usize) -> String {
    let role = NETWORK_ROLES.get(index).copied().unwrap_or("extra");
    format!("SonataService.{role}.net.{instance_id}")
}

/// Networks and subnets of a prepared service instance, one per reserved block.
pub fn service_template(
    instance_id: &str,
    subnets: &[String],
    ext_router: Option<&str>,
) -> Result<Value> {
    let mut resources = Map::new();

    for (index, cidr) in subnets.iter().enumerate() {
        let net = network_resource_name(instance_id, index);
        let subnet = format!("{net}.subnet");
        resources.insert(
            net.clone(),
            json!({ "type": "OS::Neutron::Net", "properties": { "name": net } }),
        );
        resources.insert(
            subnet.clone(),
            json!({
                "type": "OS::Neutron::Subnet",
                "properties": {
                    "name": subnet,
                    "network": { "get_resource": net },
                    "cidr": cidr,
                    "gateway_ip": gateway(cidr)?,
                    "dns_nameservers": ["8.8.8.8"]
                }
            }),
        );
        if index == 0 {
            if let Some(router) = ext_router {
                resources.insert(
                    format!("{net}.router.interface"),
                    json!({
                        "type": "OS::Neutron::RouterInterface",
                        "properties": { "router": router, "subnet": { "get_resource": subnet } }
                    }),
                );
            }
        }
    }

    Ok(json!({
        "heat_template_version": HOT_VERSION,
        "resources": resources
    }))
}

fn resources_mut(template: &mut Value) -> Result<&mut Map<String, Value>> {
    template
        .get_mut("resources")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| WrapperError::TerminalFailure("stack template has no resources".to_string()))
}

/// Adds one server group per deployment unit of `vnfd`. Returns the number of groups added.
pub fn add_function(
    template: &mut Value,
    service_instance_id: &str,
    function_id: &str,
    vnfd: &Value,
    flavor: &str,
) -> Result<usize> {
    let units = vnfd
        .get("virtual_deployment_units")
        .and_then(Value::as_array)
        .filter(|units| !units.is_empty())
        .ok_or_else(|| {
            WrapperError::Configuration("descriptor has no virtual deployment units".to_string())
        })?;
    let mgmt = network_resource_name(service_instance_id, 0);
    let resources = resources_mut(template)?;

    for unit in units {
        let unit_id = unit.get("id").and_then(Value::as_str).unwrap_or("vdu");
        let image = unit.get("vm_image").and_then(Value::as_str).unwrap_or_default();
        let name = format!("{function_id}.{unit_id}");
        resources.insert(
            name.clone(),
            json!({
                "type": "OS::Heat::ResourceGroup",
                "properties": {
                    "count": 1,
                    "resource_def": {
                        "type": "OS::Nova::Server",
                        "properties": {
                            "name": format!("{name}.%index%"),
                            "image": image,
                            "flavor": flavor,
                            "networks": [{ "network": { "get_resource": mgmt } }]
                        }
                    }
                }
            }),
        );
    }
    Ok(units.len())
}

/// Sets the server count of every group of `function_id`. Returns the number of groups changed.
pub fn scale_function(template: &mut Value, function_id: &str, count: u32) -> Result<usize> {
    let prefix = format!("{function_id}.");
    let mut changed = 0;
    for (name, resource) in resources_mut(template)?.iter_mut() {
        if name.starts_with(&prefix) && resource["type"] == "OS::Heat::ResourceGroup" {
            resource["properties"]["count"] = json!(count);
            changed += 1;
        }
    }
    if changed == 0 {
        return Err(WrapperError::TerminalFailure(format!(
            "function {function_id} is not part of the stack"
        )));
    }
    Ok(changed)
}
