//! Predefined device profiles.
//!
//! Each function returns plain [`DeviceProfile`] data for a device family:
//! prompts, pagination markers, error and ignore patterns, and the login
//! handshake. Callers may tweak the returned value before handing it to the
//! engine.

use crate::device::{DeviceProfile, HandshakeConfig};
use crate::error::ConnectError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Built-in template names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    "cisco", "cisco_xr", "nxos", "juniper", "huawei", "h3c", "arris", "casa",
];

/// Capability tags describing what a template's handshake does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCapability {
    /// Pagination is switched off during the handshake.
    PagingDisable,
    /// Privilege is raised with an escalation command.
    EnableEscalation,
    /// Pagination markers are answered when paging could not be disabled.
    MorePrompt,
    /// Configuration-mode prompts are recognized.
    ConfigPrompt,
}

/// Metadata for a built-in device template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub template_version: String,
    pub capabilities: Vec<TemplateCapability>,
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    use TemplateCapability::*;
    let (vendor, family, capabilities) = match name {
        "cisco" => (
            "Cisco",
            "IOS/IOS-XE",
            vec![PagingDisable, EnableEscalation, MorePrompt, ConfigPrompt],
        ),
        "cisco_xr" => ("Cisco", "IOS-XR", vec![PagingDisable, MorePrompt, ConfigPrompt]),
        "nxos" => ("Cisco", "NX-OS", vec![PagingDisable, MorePrompt, ConfigPrompt]),
        "juniper" => ("Juniper", "JunOS", vec![PagingDisable, MorePrompt, ConfigPrompt]),
        "huawei" => ("Huawei", "VRP", vec![PagingDisable, MorePrompt, ConfigPrompt]),
        "h3c" => ("H3C", "Comware", vec![PagingDisable, MorePrompt, ConfigPrompt]),
        "arris" => (
            "Arris",
            "CER/E6000",
            vec![PagingDisable, EnableEscalation, MorePrompt, ConfigPrompt],
        ),
        "casa" => (
            "Casa Systems",
            "CMTS",
            vec![PagingDisable, EnableEscalation, MorePrompt, ConfigPrompt],
        ),
        _ => return None,
    };
    Some(TemplateMetadata {
        name: name.to_string(),
        vendor: vendor.to_string(),
        family: family.to_string(),
        template_version: "1.0.0".to_string(),
        capabilities,
    })
}

/// Returns names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in templates.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one template by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| ConnectError::TemplateNotFound(name.to_string()))
}

/// Returns a built-in profile by name (case-insensitive).
pub fn by_name(name: &str) -> Result<DeviceProfile, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco" => Ok(cisco()),
        "cisco_xr" => Ok(cisco_xr()),
        "nxos" => Ok(nxos()),
        "juniper" => Ok(juniper()),
        "huawei" => Ok(huawei()),
        "h3c" => Ok(h3c()),
        "arris" => Ok(arris()),
        "casa" => Ok(casa()),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

/// Exports one template profile as pretty JSON, the format
/// [`DeviceProfile::from_json`] reads back.
pub fn template_json(name: &str) -> Result<String, ConnectError> {
    let profile = by_name(name)?;
    serde_json::to_string_pretty(&profile)
        .map_err(|e| ConnectError::InternalServerError(format!("encode profile json: {e}")))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn handshake(
    setup: &[&str],
    escalation: Option<&str>,
    privileged_suffix: Option<&str>,
) -> HandshakeConfig {
    HandshakeConfig {
        setup_commands: strings(setup),
        escalation_command: escalation.map(str::to_string),
        privileged_suffix: privileged_suffix.map(str::to_string),
        ..HandshakeConfig::default()
    }
}

/// Cisco IOS/IOS-XE: log in at `>`, `enable` to `#`.
pub fn cisco() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[
            r"^\S+\(\S+\)#\s*$",
            r"^[^\s#]+#\s*$",
            r"^[^\s<]+>\s*$",
        ]),
        more_patterns: strings(&[r"\s*<--- More --->\s*", r"\s*--More--\s*"]),
        error_patterns: strings(&[
            r"^% Invalid input detected at '\^' marker\.",
            r"^% Invalid command at '\^' marker\.",
            r"^% Invalid parameter detected at '\^' marker\.",
            r"^% Incomplete command\.",
            r"^% Ambiguous command:.*",
            r"^% Unknown command.*",
            r"invalid vlan \(reserved value\) at '\^' marker\.",
            r"ERROR: VLAN \d+ is not a primary vlan",
            r"^%.+",
            r"^Command authorization failed.*",
            r"^Command rejected:.*",
            r"ERROR:.+",
            r"Invalid password",
            r"Access denied.",
        ]),
        ignore_errors: strings(&[r"ERROR: object \(.+\) does not exist."]),
        handshake: HandshakeConfig {
            password_prompt: r"(?i)^\x00*\r?(enable )?password:\s*$".to_string(),
            ..handshake(
                &["terminal length 0", "terminal width 0"],
                Some("enable"),
                Some("#"),
            )
        },
        ..DeviceProfile::generic("cisco")
    }
}

/// Cisco IOS-XR: users land privileged, prompts carry the RP location.
pub fn cisco_xr() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[r"^(RP/\d+/\S+:)?[^\s#]+(\(\S+\))?#\s*$"]),
        more_patterns: strings(&[r"\s*--More--\s*"]),
        error_patterns: strings(&[
            r"^% Invalid input detected at '\^' marker\.",
            r"^% Incomplete command\.",
            r"^% Ambiguous command.*",
            r"^% Failed to commit.*",
            r"^!!% .+",
            r"^%.+",
        ]),
        handshake: handshake(&["terminal length 0", "terminal width 0"], None, Some("#")),
        ..DeviceProfile::generic("cisco_xr")
    }
}

/// Cisco NX-OS: privileged right after login.
pub fn nxos() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[r"^[^\s#]+(\(\S+\))?#\s*$"]),
        more_patterns: strings(&[r"\s*--More--\s*"]),
        error_patterns: strings(&[
            r"^% Invalid command at '\^' marker\.",
            r"^% Invalid .+",
            r"^% Incomplete command.*",
            r"^% Ambiguous command.*",
            r"^ERROR: .+",
            r"^Syntax error while parsing .+",
        ]),
        handshake: handshake(&["terminal length 0", "terminal width 511"], None, Some("#")),
        ..DeviceProfile::generic("nxos")
    }
}

/// Juniper JunOS: operational `>` and configuration `#` modes, no escalation.
pub fn juniper() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[r"^\S+@\S+#\s*$", r"^\S+@\S+>\s*$"]),
        more_patterns: strings(&[r"---\(more.*\)---"]),
        error_patterns: strings(&[
            r".*unknown command.*",
            r"syntax error.*",
            r"error:.+",
            r".+not found.*",
            r"invalid value .+",
            r"invalid ip address .+",
            r".*invalid prefix length .+",
            r"prefix length \S+ is larger than \d+ .+",
            r"number: \S+: Value must be a number from 0 to 255 at \S+",
        ]),
        ignore_errors: strings(&[
            r"warning: statement not found",
            r"warning: element \S+ not found",
        ]),
        handshake: handshake(
            &["set cli screen-length 0", "set cli screen-width 0"],
            None,
            None,
        ),
        ..DeviceProfile::generic("juniper")
    }
}

/// Huawei VRP: user view `<name>`, system view `[name]`.
pub fn huawei() -> DeviceProfile {
    DeviceProfile {
        prompt_suffixes: strings(&["]"]),
        prompt_patterns: strings(&[
            r"^(HRP_M|HRP_S){0,1}\[.+]+\s*$",
            r"^(RBM_P|RBM_S)?<.+>\s*$",
        ]),
        more_patterns: strings(&[r"\s*---- More ----\s*"]),
        error_patterns: strings(&[
            r"^Error: Unrecognized command found at '\^' position\.",
            r"^Error: Incomplete command found at '\^' position\.",
            r"Error: .+$",
        ]),
        ignore_errors: strings(&[
            r"Error: Address item conflicts!",
            r"Error: The address item does not exist!",
            r"Error: The delete configuration does not exist.",
            r"Error: The address or address set is not created!",
            r"Error: Cannot add! Service item conflicts or illegal reference!",
            r"Error: The service item does not exist!",
            r"Error: Service item conflicts!",
            r"Error: The service set is not created(.+)!",
            r"Error: No such a time-range.",
            r"Error: The specified address-group does not exist.",
            r"Error: The specified rule does not exist yet.",
            r"This condition has already been configured",
        ]),
        handshake: handshake(&["screen-length 0 temporary"], None, None),
        ..DeviceProfile::generic("huawei")
    }
}

/// H3C Comware: same prompt shapes as VRP.
pub fn h3c() -> DeviceProfile {
    DeviceProfile {
        prompt_suffixes: strings(&["]"]),
        prompt_patterns: strings(&[r"^(RBM_P|RBM_S)?\[.+\]\s*$", r"^(RBM_P|RBM_S)?<.+>\s*$"]),
        more_patterns: strings(&[r"\s*---- More ----\s*"]),
        error_patterns: strings(&[
            r"^\s*% Unrecognized command found at '\^' position\.",
            r"^\s*% Incomplete command found at '\^' position\.",
            r"^\s*% Too many parameters found at '\^' position\.",
            r".+doesn't exist.+",
            r".+does not exist.+",
            r"Object group with given name exists with different type.",
        ]),
        handshake: handshake(&["screen-length disable"], None, None),
        ..DeviceProfile::generic("h3c")
    }
}

/// Arris CER/E6000 CMTS.
pub fn arris() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[r"^[^\s#>]+(\(\S+\))?[#>]\s*$"]),
        more_patterns: strings(&[r"\s*--More--\s*", r"\s*-- More --\s*"]),
        error_patterns: strings(&[
            r"^\s*Invalid input.*",
            r"^\s*Ambiguous command.*",
            r"^\s*Incomplete command.*",
            r"^Error: .+",
            r"^%.+",
        ]),
        handshake: handshake(&["terminal length 0"], Some("enable"), Some("#")),
        ..DeviceProfile::generic("arris")
    }
}

/// Casa Systems CMTS.
pub fn casa() -> DeviceProfile {
    DeviceProfile {
        prompt_patterns: strings(&[r"^[^\s#>]+(\(\S+\))?[#>]\s*$"]),
        more_patterns: strings(&[r"\s*--More--\s*"]),
        error_patterns: strings(&[
            r"^%.+",
            r"^\s*Invalid command.*",
            r"^\s*Unknown command.*",
            r"^Error: .+",
        ]),
        handshake: handshake(&["page-off"], Some("enable"), Some("#")),
        ..DeviceProfile::generic("casa")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptResolver;

    #[test]
    fn available_templates_contains_expected_names() {
        let names = available_templates();
        assert!(names.contains(&"cisco"));
        assert!(names.contains(&"juniper"));
        assert!(names.contains(&"casa"));
    }

    #[test]
    fn every_builtin_profile_compiles() {
        for name in BUILTIN_TEMPLATES {
            let profile = by_name(name).expect("template");
            assert_eq!(profile.name, *name);
            profile.error_set().expect("error patterns");
            profile.password_prompt().expect("password prompt");
            PromptResolver::from_profile(&profile).expect("prompt patterns");
        }
    }

    #[test]
    fn by_name_is_case_insensitive() {
        let profile = by_name("CiScO").expect("cisco template should load");
        assert_eq!(profile.handshake.escalation_command.as_deref(), Some("enable"));
        assert_eq!(profile.handshake.setup_commands[0], "terminal length 0");
    }

    #[test]
    fn by_name_returns_template_not_found_for_unknown_name() {
        let err = match by_name("unknown-vendor") {
            Ok(_) => panic!("unknown template should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::TemplateNotFound(_)));
    }

    #[test]
    fn template_catalog_has_metadata_for_all_builtin_templates() {
        let catalog = template_catalog();
        assert_eq!(catalog.len(), BUILTIN_TEMPLATES.len());
        assert!(catalog.iter().any(|m| m.name == "cisco_xr"));
        assert!(catalog.iter().any(|m| m.vendor == "Arris"));
    }

    #[test]
    fn template_metadata_is_case_insensitive() {
        let meta = template_metadata("JuNiPeR").expect("metadata should resolve");
        assert_eq!(meta.name, "juniper");
        assert_eq!(meta.vendor, "Juniper");
    }

    #[test]
    fn cisco_errors_prefer_the_specific_pattern() {
        let set = cisco().error_set().expect("errors");
        let found = set
            .classify("show ip bgp sumary\n                  ^\n% Invalid input detected at '^' marker.")
            .expect("match");
        assert_eq!(found.pattern, r"^% Invalid input detected at '\^' marker\.");
        assert_eq!(found.matched, "% Invalid input detected at '^' marker.");
    }

    #[test]
    fn huawei_ignores_benign_conflicts() {
        let set = huawei().error_set().expect("errors");
        assert!(set.classify("Error: Address item conflicts!").is_none());
        assert!(set.classify("Error: Unrecognized command found at '^' position.").is_some());
    }

    #[test]
    fn cisco_prompts_cover_user_enable_and_config_modes() {
        let resolver = PromptResolver::from_profile(&cisco()).expect("resolver");
        assert!(resolver.looks_like_prompt("r1>"));
        assert!(resolver.looks_like_prompt("r1#"));
        assert!(resolver.looks_like_prompt("r1(config-if)#"));
        assert!(!resolver.looks_like_prompt("hostname r1 # comment"));
    }

    #[test]
    fn cisco_password_prompt_matches_enable_variant() {
        let re = cisco().password_prompt().expect("regex");
        assert!(re.is_match("Password: "));
        assert!(re.is_match("Enable Password:"));
    }

    #[test]
    fn template_json_round_trips_through_from_json() {
        let json = template_json("huawei").expect("json");
        let profile = DeviceProfile::from_json(&json).expect("parse");
        assert_eq!(profile, huawei());
    }
}
