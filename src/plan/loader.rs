use super::Plan;
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde_json::{Map, Value};
use serde_valid::Validate;
use std::{collections::HashMap, fs, path::Path};

const VARS_KEY: &str = "vars";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlanFormat {
    Json,
    Yaml,
}

impl PlanFormat {
    /// `.json` files are JSON, everything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => PlanFormat::Json,
            _ => PlanFormat::Yaml,
        }
    }
}

/// Parse a `NAME=VALUE` command line override
pub fn parse_var(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{arg}'")),
    }
}

/// Load and validate a plan file
///
/// # Arguments
/// * `path` - YAML or JSON plan file
/// * `overrides` - variables taking precedence over the file's `vars`
pub fn load_plan(path: &Path, overrides: &[(String, String)]) -> Result<Plan> {
    info!("load plan {path:?}");

    let content =
        fs::read_to_string(path).context(format!("failed to read plan file: {path:?}"))?;

    parse_plan(&content, PlanFormat::from_path(path), overrides)
        .context(format!("failed to load plan: {path:?}"))
}

pub fn parse_plan(
    content: &str,
    format: PlanFormat,
    overrides: &[(String, String)],
) -> Result<Plan> {
    let mut document: Value = match format {
        PlanFormat::Json => serde_json::from_str(content).context("failed to parse json")?,
        PlanFormat::Yaml => serde_yaml::from_str(content).context("failed to parse yaml")?,
    };

    let Value::Object(root) = &mut document else {
        bail!("plan must be a mapping with a 'steps' list");
    };

    let mut vars = match root.remove(VARS_KEY) {
        Some(Value::Object(vars)) => vars_to_strings(vars)?,
        Some(Value::Null) | None => HashMap::new(),
        Some(_) => bail!("'{VARS_KEY}' must be a mapping"),
    };

    vars.extend(overrides.iter().cloned());
    debug!("plan variables: {:?}", vars.keys().collect::<Vec<_>>());

    substitute(&mut document, &vars)?;

    let plan: Plan = serde_json::from_value(document).context("invalid plan structure")?;
    plan.validate().context("plan validation failed")?;

    for (index, step) in plan.steps().iter().enumerate() {
        let mut compensation = step.rollback();
        while let Some(rollback) = compensation {
            rollback
                .validate()
                .context(format!("rollback of step {index} failed validation"))
                .context("plan validation failed")?;
            compensation = rollback.rollback();
        }
    }

    Ok(plan)
}

fn vars_to_strings(vars: Map<String, Value>) -> Result<HashMap<String, String>> {
    vars.into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name, s)),
            Value::Bool(_) | Value::Number(_) => Ok((name, value.to_string())),
            _ => bail!("variable '{name}' must be a scalar"),
        })
        .collect()
}

fn substitute(value: &mut Value, vars: &HashMap<String, String>) -> Result<()> {
    match value {
        Value::String(s) if s.contains("${") => {
            *s = substitute_str(s, vars)?;
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, vars)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, vars)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace every `${name}` in `input`
fn substitute_str(input: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            bail!("unterminated variable reference in '{input}'");
        };
        let name = &after[..end];
        let value = vars
            .get(name)
            .with_context(|| format!("undefined variable '{name}' in '{input}'"))?;
        output.push_str(value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Action, Precondition, RollbackScope, params};
    use serde_json::json;

    const DEMO_PLAN: &str = r#"
name: enable-mesh
vars:
  ssid: prplmesh_demo
  channel: 6
steps:
  - name: enable 2.4GHz radio
    kind: set
    target: Device.WiFi.Radio.1.
    params:
      Enable: true
    rollback:
      kind: set
      target: Device.WiFi.Radio.1.
      params:
        Enable: false
  - name: set ssid
    kind: set
    target: Device.WiFi.SSID.1.
    params:
      SSID: "${ssid}"
      Channel: "${channel}"
    precondition:
      exists: Device.WiFi.SSID.1.
    wait_for:
      path: Device.WiFi.SSID.1.
      timeout_secs: 30
  - kind: shell
    program: /etc/init.d/dropbear
    args: [restart]
    rollback:
      kind: shell
      program: /etc/init.d/dropbear
      args: [stop]
    rollback_scope: always
"#;

    #[test]
    fn parses_yaml_plan_with_variables() {
        let plan = parse_plan(DEMO_PLAN, PlanFormat::Yaml, &[]).unwrap();

        assert_eq!(plan.name(), "enable-mesh");
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.steps()[1].action(),
            &Action::Set {
                target: "Device.WiFi.SSID.1.".into(),
                params: params(json!({"SSID": "prplmesh_demo", "Channel": "6"})),
            }
        );
        assert_eq!(
            plan.steps()[1].precondition(),
            Some(&Precondition::Exists("Device.WiFi.SSID.1.".into()))
        );
        assert_eq!(
            plan.steps()[1].wait_target().and_then(|w| w.timeout_secs),
            Some(30)
        );
        assert_eq!(plan.steps()[2].rollback_scope(), RollbackScope::Always);
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = vec![("ssid".to_string(), "lab".to_string())];
        let plan = parse_plan(DEMO_PLAN, PlanFormat::Yaml, &overrides).unwrap();

        let Action::Set { params, .. } = plan.steps()[1].action() else {
            panic!("expected set action");
        };
        assert_eq!(params.get("SSID"), Some(&json!("lab")));
    }

    #[test]
    fn undefined_variable_is_rejected() {
        let content = r#"{"steps": [{"kind": "set", "target": "Device.WiFi.SSID.${idx}."}]}"#;
        let err = parse_plan(content, PlanFormat::Json, &[]).unwrap_err();
        assert!(format!("{err:#}").contains("undefined variable 'idx'"));
    }

    #[test]
    fn plan_without_steps_is_rejected() {
        let err = parse_plan("name: nothing\nsteps: []\n", PlanFormat::Yaml, &[]).unwrap_err();
        assert!(format!("{err:#}").contains("plan validation failed"));
    }

    #[test]
    fn rollback_retry_limit_is_enforced() {
        let content = r#"
steps:
  - kind: set
    target: Device.Firewall.
    params: { Enable: false }
    rollback:
      kind: set
      target: Device.Firewall.
      params: { Enable: true }
      retry: { max_retries: 11 }
"#;
        let err = parse_plan(content, PlanFormat::Yaml, &[]).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("plan validation failed"));
        assert!(message.contains("rollback of step 0"));
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        assert!(parse_plan("- kind: set", PlanFormat::Yaml, &[]).is_err());
    }

    mod substitution {
        use super::*;

        fn vars() -> HashMap<String, String> {
            HashMap::from([
                ("lan".to_string(), "br-lan".to_string()),
                ("ip".to_string(), "192.168.1.110".to_string()),
            ])
        }

        #[test]
        fn replaces_multiple_references() {
            assert_eq!(
                substitute_str("${lan}:${ip}/24", &vars()).unwrap(),
                "br-lan:192.168.1.110/24"
            );
        }

        #[test]
        fn leaves_plain_text_alone() {
            assert_eq!(substitute_str("no refs $here", &vars()).unwrap(), "no refs $here");
        }

        #[test]
        fn unterminated_reference_fails() {
            assert!(substitute_str("${lan", &vars()).is_err());
        }
    }

    mod var_arguments {
        use super::*;

        #[test]
        fn splits_on_first_equals() {
            assert_eq!(
                parse_var("psk=a=b"),
                Ok(("psk".to_string(), "a=b".to_string()))
            );
        }

        #[test]
        fn rejects_missing_name_or_separator() {
            assert!(parse_var("=value").is_err());
            assert!(parse_var("novalue").is_err());
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(PlanFormat::from_path(Path::new("plan.json")), PlanFormat::Json);
        assert_eq!(PlanFormat::from_path(Path::new("plan.yaml")), PlanFormat::Yaml);
        assert_eq!(PlanFormat::from_path(Path::new("plan")), PlanFormat::Yaml);
    }
}
