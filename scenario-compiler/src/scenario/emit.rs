use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::SerializationError;

use super::document::{Command, Resource, Scenario};

/// Assemble a scenario, refusing any document a runtime could not resolve.
pub fn emit(
    name: &str,
    resources: Vec<Resource>,
    commands: Vec<Command>,
) -> Result<Scenario, SerializationError> {
    check_invariants(&resources, &commands)?;
    debug!(
        "emitting scenario '{name}': {} resources, {} commands",
        resources.len(),
        commands.len()
    );
    Ok(Scenario::new(name.to_string(), resources, commands))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResourceType {
    Buffer,
    Shader,
}

/// Uids are unique, `shader_ref`s name shaders, bindings name buffers, and
/// binding ids do not repeat within a dispatch.
pub(crate) fn check_invariants(
    resources: &[Resource],
    commands: &[Command],
) -> Result<(), SerializationError> {
    let mut declared: HashMap<&str, ResourceType> = HashMap::with_capacity(resources.len());
    for resource in resources {
        let ty = match resource {
            Resource::Buffer(_) => ResourceType::Buffer,
            Resource::Shader(_) => ResourceType::Shader,
        };
        if declared.insert(resource.uid(), ty).is_some() {
            return Err(violation(format!(
                "resource uid '{}' declared twice",
                resource.uid()
            )));
        }
    }

    for (index, command) in commands.iter().enumerate() {
        let dispatch = command.as_dispatch();
        match declared.get(dispatch.shader_ref.as_str()) {
            Some(ResourceType::Shader) => {}
            Some(ResourceType::Buffer) => {
                return Err(violation(format!(
                    "command {index}: shader_ref '{}' names a buffer",
                    dispatch.shader_ref
                )))
            }
            None => {
                return Err(violation(format!(
                    "command {index}: shader_ref '{}' is not declared",
                    dispatch.shader_ref
                )))
            }
        }

        let mut ids = HashSet::with_capacity(dispatch.bindings.len());
        for binding in &dispatch.bindings {
            if !ids.insert((binding.set, binding.id)) {
                return Err(violation(format!(
                    "command {index}: binding {} in set {} used twice",
                    binding.id, binding.set
                )));
            }
            match declared.get(binding.resource_ref.as_str()) {
                Some(ResourceType::Buffer) => {}
                Some(ResourceType::Shader) => {
                    return Err(violation(format!(
                        "command {index}: binding {} references shader '{}'",
                        binding.id, binding.resource_ref
                    )))
                }
                None => {
                    return Err(violation(format!(
                        "command {index}: binding {} references undeclared '{}'",
                        binding.id, binding.resource_ref
                    )))
                }
            }
        }
    }

    Ok(())
}

fn violation(message: String) -> SerializationError {
    SerializationError::InvariantViolated(message)
}
