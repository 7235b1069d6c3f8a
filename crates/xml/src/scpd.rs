use std::collections::HashMap;

use upnp_recon_core::{
    ActionArgument, Direction, RconError, Range, Result, ScpdDocument, SoapAction, StateVariable,
};

fn child<'a>(node: roxmltree::Node<'a, 'a>, name: &str) -> Option<roxmltree::Node<'a, 'a>> {
    node.children().find(|c| c.is_element() && c.tag_name().name() == name)
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name).and_then(|n| n.text()).map(|s| s.trim().to_string())
}

fn parse_allowed_values(node: roxmltree::Node<'_, '_>) -> Option<Vec<String>> {
    let list = child(node, "allowedValueList")?;
    let values: Vec<String> = list
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "allowedValue")
        .filter_map(|c| c.text().map(|t| t.trim().to_string()))
        .collect();
    (!values.is_empty()).then_some(values)
}

fn parse_range(node: roxmltree::Node<'_, '_>) -> Option<Range> {
    let range_node = child(node, "allowedValueRange")?;
    Some(Range {
        min: child_text(range_node, "minimum").unwrap_or_default(),
        max: child_text(range_node, "maximum").unwrap_or_default(),
        step: child_text(range_node, "step"),
    })
}

fn parse_state_variables(scpd: roxmltree::Node<'_, '_>) -> HashMap<String, StateVariable> {
    let mut vars = HashMap::new();
    let Some(table) = child(scpd, "serviceStateTable") else {
        return vars;
    };
    for sv in table
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "stateVariable")
    {
        let Some(name) = child_text(sv, "name") else {
            continue;
        };
        let send_events = sv
            .attribute("sendEvents")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        vars.insert(
            name.clone(),
            StateVariable {
                name,
                data_type: child_text(sv, "dataType").unwrap_or_else(|| "string".to_string()),
                send_events,
                default_value: child_text(sv, "defaultValue"),
                allowed_values: parse_allowed_values(sv),
                range: parse_range(sv),
            },
        );
    }
    vars
}

fn parse_arguments(
    action_node: roxmltree::Node<'_, '_>,
    state_vars: &HashMap<String, StateVariable>,
) -> (Vec<ActionArgument>, Vec<ActionArgument>) {
    let mut args_in = Vec::new();
    let mut args_out = Vec::new();

    let Some(arg_list) = child(action_node, "argumentList") else {
        return (args_in, args_out);
    };

    for arg in arg_list
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "argument")
    {
        let Some(name) = child_text(arg, "name") else {
            continue;
        };
        let direction = match child_text(arg, "direction").as_deref() {
            Some("out") => Direction::Out,
            _ => Direction::In,
        };
        let related = child_text(arg, "relatedStateVariable");
        let related_var = related.as_ref().and_then(|r| state_vars.get(r));

        // Spec §4.2: an argument's dataType, allowed values and range are
        // inherited from its related state variable when not given directly.
        let data_type = related_var
            .map(|v| v.data_type.clone())
            .unwrap_or_else(|| "string".to_string());
        let allowed_values = related_var.and_then(|v| v.allowed_values.clone());
        let range = related_var.and_then(|v| v.range.clone());

        let argument = ActionArgument {
            name,
            direction,
            data_type,
            related_state_variable: related,
            allowed_values,
            range,
        };

        match direction {
            Direction::In => args_in.push(argument),
            Direction::Out => args_out.push(argument),
        }
    }

    (args_in, args_out)
}

/// Parses an SCPD (Service Control Protocol Description) document (spec
/// §4.2). A missing `<actionList>` yields an empty action set, not an error;
/// the document as a whole only fails with `MalformedXml` when its root
/// can't be parsed at all.
pub fn parse_scpd(xml: &str) -> Result<ScpdDocument> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| RconError::MalformedXml(format!("{e}")))?;
    let root = doc.root_element();

    let state_variables = parse_state_variables(root);
    let mut actions = HashMap::new();
    let mut parse_errors = Vec::new();

    if let Some(action_list) = child(root, "actionList") {
        for action_node in action_list
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "action")
        {
            let Some(name) = child_text(action_node, "name") else {
                parse_errors.push("action with no <name>".to_string());
                continue;
            };
            let (args_in, args_out) = parse_arguments(action_node, &state_variables);
            actions.insert(name.clone(), SoapAction::new(name, args_in, args_out));
        }
    }

    Ok(ScpdDocument {
        actions,
        state_variables,
        parse_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use upnp_recon_core::Complexity;

    const AVTRANSPORT_SCPD: &str = include_str!("resources/test/avtransport_scpd.xml");

    #[test]
    fn parses_actions_and_inherits_data_type() {
        let doc = parse_scpd(AVTRANSPORT_SCPD).unwrap();
        assert!(doc.parse_errors.is_empty());
        let set_uri = doc.actions.get("SetAVTransportURI").unwrap();
        assert_eq!(set_uri.arguments_in.len(), 3);
        let instance_id = &set_uri.arguments_in[0];
        assert_eq!(instance_id.data_type, "ui4");

        let play = doc.actions.get("Play").unwrap();
        assert_eq!(play.complexity, Complexity::classify(play.arguments_in.len(), play.arguments_out.len()));
    }

    #[test]
    fn missing_action_list_yields_empty_actions() {
        let xml = r#"<scpd><serviceStateTable></serviceStateTable></scpd>"#;
        let doc = parse_scpd(xml).unwrap();
        assert!(doc.actions.is_empty());
        assert!(doc.parse_errors.is_empty());
    }

    #[test]
    fn unparseable_root_is_malformed() {
        let err = parse_scpd("not xml at all <<<").unwrap_err();
        assert!(matches!(err, RconError::MalformedXml(_)));
    }

    #[test]
    fn allowed_value_range_is_inherited_onto_argument() {
        let doc = parse_scpd(AVTRANSPORT_SCPD).unwrap();
        let set_volume_like = doc.actions.get("Seek").unwrap();
        let target = set_volume_like
            .arguments_in
            .iter()
            .find(|a| a.name == "Unit")
            .unwrap();
        assert!(target.allowed_values.as_ref().unwrap().contains(&"REL_TIME".to_string()));
    }
}
