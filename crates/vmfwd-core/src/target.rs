//! Target resolution: `kind/name[/namespace]` and the legacy dotted forms.
//!
//! | Input                 | Kind | Namespace | Name   |
//! |-----------------------|------|-----------|--------|
//! | `testvmi`             | VMI  | ``        | testvmi|
//! | `testvmi.ns1`         | VMI  | `ns1`     | testvmi|
//! | `vm/testvm`           | VM   | ``        | testvm |
//! | `vm/testvm/ns1`       | VM   | `ns1`     | testvm |
//! | `vmi/testvmi.ns1`     | VMI  | `ns1`     | testvmi|
//!
//! An empty namespace means "use the caller's default".

use std::fmt;
use std::str::FromStr;

use crate::error::TargetError;

/// Which kind of remote resource the stream is opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceKind {
    Vm,
    #[default]
    Vmi,
}

impl ResourceKind {
    /// API resource name used in subresource paths.
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Vm => "virtualmachines",
            ResourceKind::Vmi => "virtualmachineinstances",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Vmi => "vmi",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ResourceKind {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, TargetError> {
        match s.to_ascii_lowercase().as_str() {
            "vm" | "vms" | "virtualmachine" | "virtualmachines" => Ok(ResourceKind::Vm),
            "vmi" | "vmis" | "virtualmachineinstance" | "virtualmachineinstances" => {
                Ok(ResourceKind::Vmi)
            }
            _ => Err(TargetError::UnsupportedKind(s.to_string())),
        }
    }
}

/// The resolved remote resource all streams of one invocation are opened against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardTarget {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ForwardTarget {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Fill in `namespace` when the target string did not carry one.
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        if self.namespace.is_empty() {
            self.namespace = namespace.to_string();
        }
        self
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.name, self.namespace)
        }
    }
}

impl FromStr for ForwardTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, TargetError> {
        parse_target(s)
    }
}

/// Resolve a target string into kind, namespace and name.
pub fn parse_target(target: &str) -> Result<ForwardTarget, TargetError> {
    if target.is_empty() {
        return Err(TargetError::MissingName);
    }

    let parts: Vec<&str> = target.split('/').collect();
    match parts.as_slice() {
        [name] => split_legacy(ResourceKind::default(), name, target),
        [kind, name] => {
            let kind = kind.parse::<ResourceKind>()?;
            split_legacy(kind, name, target)
        }
        [kind, name, namespace] => {
            let kind = kind.parse::<ResourceKind>()?;
            if name.is_empty() {
                return Err(TargetError::MissingName);
            }
            if namespace.is_empty() {
                return Err(TargetError::EmptyNamespace);
            }
            Ok(ForwardTarget::new(kind, *namespace, *name))
        }
        _ => Err(TargetError::TooManySeparators(target.to_string())),
    }
}

/// Handle `name` or the legacy `name.namespace` form.
fn split_legacy(kind: ResourceKind, name: &str, target: &str) -> Result<ForwardTarget, TargetError> {
    if name.is_empty() {
        return Err(TargetError::MissingName);
    }

    let mut pieces = name.split('.');
    let name = pieces.next().unwrap_or_default();
    let namespace = pieces.next();
    if pieces.next().is_some() {
        return Err(TargetError::TooManySeparators(target.to_string()));
    }
    if name.is_empty() {
        return Err(TargetError::MissingName);
    }

    match namespace {
        Some("") => Err(TargetError::EmptyNamespace),
        Some(namespace) => Ok(ForwardTarget::new(kind, namespace, name)),
        None => Ok(ForwardTarget::new(kind, "", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_name() {
        let t = parse_target("vmi/testvmi").unwrap();
        assert_eq!(t, ForwardTarget::new(ResourceKind::Vmi, "", "testvmi"));
    }

    #[test]
    fn kind_name_namespace() {
        let t = parse_target("vm/testvm/ns1").unwrap();
        assert_eq!(t, ForwardTarget::new(ResourceKind::Vm, "ns1", "testvm"));
    }

    #[test]
    fn bare_name_defaults_to_vmi() {
        let t = parse_target("testvmi").unwrap();
        assert_eq!(t.kind, ResourceKind::Vmi);
        assert_eq!(t.name, "testvmi");
        assert!(t.namespace.is_empty());
    }

    #[test]
    fn legacy_dotted_forms() {
        assert_eq!(
            parse_target("testvmi.ns1").unwrap(),
            ForwardTarget::new(ResourceKind::Vmi, "ns1", "testvmi")
        );
        assert_eq!(
            parse_target("vm/testvm.ns1").unwrap(),
            ForwardTarget::new(ResourceKind::Vm, "ns1", "testvm")
        );
    }

    #[test]
    fn kind_spellings_are_case_insensitive() {
        for kind in ["vm", "VMs", "VirtualMachine", "virtualmachines"] {
            assert_eq!(kind.parse::<ResourceKind>().unwrap(), ResourceKind::Vm, "{kind}");
        }
        for kind in ["vmi", "VMIS", "virtualMachineInstance", "virtualmachineinstances"] {
            assert_eq!(kind.parse::<ResourceKind>().unwrap(), ResourceKind::Vmi, "{kind}");
        }
    }

    #[test]
    fn name_and_namespace_keep_case() {
        let t = parse_target("VM/MyVm/MyNs").unwrap();
        assert_eq!(t.name, "MyVm");
        assert_eq!(t.namespace, "MyNs");
    }

    #[test]
    fn unsupported_kind() {
        assert_eq!(
            parse_target("bogus/x").unwrap_err(),
            TargetError::UnsupportedKind("bogus".into())
        );
    }

    #[test]
    fn missing_name() {
        assert_eq!(parse_target("vmi/").unwrap_err(), TargetError::MissingName);
        assert_eq!(parse_target("").unwrap_err(), TargetError::MissingName);
        assert_eq!(parse_target("vm//ns").unwrap_err(), TargetError::MissingName);
        assert_eq!(parse_target(".ns").unwrap_err(), TargetError::MissingName);
    }

    #[test]
    fn empty_namespace() {
        assert_eq!(parse_target("vm/testvm/").unwrap_err(), TargetError::EmptyNamespace);
        assert_eq!(parse_target("testvmi.").unwrap_err(), TargetError::EmptyNamespace);
    }

    #[test]
    fn too_many_separators() {
        assert!(matches!(
            parse_target("vm/a/b/c"),
            Err(TargetError::TooManySeparators(_))
        ));
        assert!(matches!(
            parse_target("a.b.c"),
            Err(TargetError::TooManySeparators(_))
        ));
    }

    #[test]
    fn default_namespace_only_fills_empty() {
        let t = parse_target("vmi/a").unwrap().with_default_namespace("default");
        assert_eq!(t.namespace, "default");
        let t = parse_target("vmi/a/ns").unwrap().with_default_namespace("default");
        assert_eq!(t.namespace, "ns");
    }

    #[test]
    fn display_renders_slash_form() {
        assert_eq!(parse_target("testvm.ns").unwrap().to_string(), "vmi/testvm/ns");
        assert_eq!(parse_target("vm/testvm").unwrap().to_string(), "vm/testvm");
        assert_eq!(ResourceKind::Vm.plural(), "virtualmachines");
    }
}
