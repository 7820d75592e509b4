//! Accessibility tree snapshot and uid system.
//!
//! Converts the engine's accessibility tree into a compact text
//! representation with deterministic numeric element uids for element
//! addressing in later click/fill/drag calls.

use serde_json::Value;
use std::collections::HashMap;

/// An accessibility node with uid annotation.
#[derive(Debug, Clone)]
pub struct AxNode {
    pub role: String,
    pub name: String,
    pub value: String,
    pub backend_node_id: Option<i64>,
    pub uid: Option<u32>,
    pub children: Vec<AxNode>,
    pub interactive: bool,
    pub focused: bool,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub expanded: Option<bool>,
    pub level: Option<i32>,
}

/// What a uid resolves to when an interaction tool addresses it.
#[derive(Debug, Clone)]
pub struct UidEntry {
    pub backend_node_id: Option<i64>,
    pub role: String,
    pub name: String,
}

pub type UidMap = HashMap<u32, UidEntry>;

/// Roles considered interactive (buttons, inputs, links, etc.).
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "radio", "checkbox", "switch", "slider", "spinbutton",
    "tab", "treeitem", "gridcell", "columnheader", "rowheader",
    "textField", "TextField", "select",
];

/// Roles that are structural/container (skipped in compact mode if empty).
const STRUCTURAL_ROLES: &[&str] = &[
    "generic", "none", "presentation", "group", "region",
    "GenericContainer", "Section",
];

/// Parse the CDP accessibility tree response into our AxNode tree.
pub fn parse_ax_tree(cdp_response: &Value) -> Vec<AxNode> {
    let nodes = match cdp_response.get("nodes").and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    if nodes.is_empty() {
        return Vec::new();
    }

    // Build a map of nodeId -> cdp node
    let mut node_map: HashMap<String, &Value> = HashMap::new();
    for node in nodes {
        if let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) {
            node_map.insert(id.to_string(), node);
        }
    }

    match nodes.first() {
        Some(root) => {
            let root_id = root.get("nodeId").and_then(|v| v.as_str()).unwrap_or("");
            vec![build_ax_node(root_id, &node_map)]
        }
        None => Vec::new(),
    }
}

fn build_ax_node(node_id: &str, node_map: &HashMap<String, &Value>) -> AxNode {
    let node = match node_map.get(node_id) {
        Some(n) => *n,
        None => {
            return AxNode {
                role: "unknown".to_string(),
                name: String::new(),
                value: String::new(),
                backend_node_id: None,
                uid: None,
                children: Vec::new(),
                interactive: false,
                focused: false,
                checked: None,
                disabled: false,
                expanded: None,
                level: None,
            };
        }
    };

    let role = get_ax_value(node, "role");
    let name = get_ax_value(node, "name");
    let value = get_ax_value(node, "value");

    let backend_node_id = node.get("backendDOMNodeId").and_then(|v| v.as_i64());

    let interactive = INTERACTIVE_ROLES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(&role));

    let mut focused = false;
    let mut checked = None;
    let mut disabled = false;
    let mut expanded = None;
    let mut level = None;

    if let Some(props) = node.get("properties").and_then(|v| v.as_array()) {
        for prop in props {
            let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let prop_value = prop
                .get("value")
                .and_then(|v| v.get("value"))
                .cloned()
                .unwrap_or(Value::Null);
            match prop_name {
                "focused" => focused = prop_value.as_bool().unwrap_or(false),
                "checked" => checked = prop_value.as_bool().or(Some(false)),
                "disabled" => disabled = prop_value.as_bool().unwrap_or(false),
                "expanded" => expanded = prop_value.as_bool(),
                "level" => level = prop_value.as_i64().map(|v| v as i32),
                _ => {}
            }
        }
    }

    let children = if let Some(child_ids) = node.get("childIds").and_then(|v| v.as_array()) {
        child_ids
            .iter()
            .filter_map(|id| id.as_str())
            .map(|id| build_ax_node(id, node_map))
            .collect()
    } else {
        Vec::new()
    };

    AxNode {
        role,
        name,
        value,
        backend_node_id,
        uid: None,
        children,
        interactive,
        focused,
        checked,
        disabled,
        expanded,
        level,
    }
}

fn get_ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| {
            // CDP returns {type: "...", value: "..."} for role/name/value
            v.get("value")
                .and_then(|val| val.as_str())
                .or_else(|| v.as_str())
        })
        .unwrap_or("")
        .to_string()
}

/// Assign numeric uids to addressable elements in the tree. Returns the
/// updated counter and the uid -> node metadata map.
pub fn assign_uids(nodes: &mut [AxNode], start_counter: u32, interactive_only: bool) -> (u32, UidMap) {
    let mut counter = start_counter;
    let mut uid_map = UidMap::new();
    for node in nodes.iter_mut() {
        assign_uids_recursive(node, &mut counter, &mut uid_map, interactive_only);
    }
    (counter, uid_map)
}

fn assign_uids_recursive(
    node: &mut AxNode,
    counter: &mut u32,
    uid_map: &mut UidMap,
    interactive_only: bool,
) {
    let should_assign = if interactive_only {
        node.interactive
    } else {
        // Interactive plus any named non-structural element
        node.interactive
            || (!node.name.is_empty()
                && !STRUCTURAL_ROLES
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&node.role)))
    };

    if should_assign {
        *counter += 1;
        node.uid = Some(*counter);
        uid_map.insert(
            *counter,
            UidEntry {
                backend_node_id: node.backend_node_id,
                role: node.role.clone(),
                name: node.name.clone(),
            },
        );
    }

    for child in node.children.iter_mut() {
        assign_uids_recursive(child, counter, uid_map, interactive_only);
    }
}

/// Render the accessibility tree as a compact text representation.
pub fn render_tree(nodes: &[AxNode], compact: bool, max_depth: Option<usize>) -> String {
    let mut output = String::new();
    for node in nodes {
        render_node(&mut output, node, 0, compact, max_depth);
    }
    output
}

fn render_node(
    output: &mut String,
    node: &AxNode,
    indent: usize,
    compact: bool,
    max_depth: Option<usize>,
) {
    if let Some(max) = max_depth {
        if indent > max {
            return;
        }
    }

    // In compact mode, skip empty structural elements
    if compact
        && STRUCTURAL_ROLES
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&node.role))
        && node.name.is_empty()
        && node.uid.is_none()
    {
        for child in &node.children {
            render_node(output, child, indent, compact, max_depth);
        }
        return;
    }

    if compact && node.role == "StaticText" && node.name.is_empty() {
        return;
    }

    let prefix = "  ".repeat(indent);
    let mut line = format!("{}- {}", prefix, node.role);

    if !node.name.is_empty() {
        let name = clip(&node.name, 80);
        line.push_str(&format!(" \"{}\"", name));
    }

    if let Some(uid) = node.uid {
        line.push_str(&format!(" [uid={}]", uid));
    }

    if let Some(level) = node.level {
        line.push_str(&format!(" [level={}]", level));
    }
    if node.focused {
        line.push_str(" [focused]");
    }
    if let Some(true) = node.checked {
        line.push_str(" [checked]");
    }
    if node.disabled {
        line.push_str(" [disabled]");
    }
    if let Some(expanded) = node.expanded {
        line.push_str(if expanded { " [expanded]" } else { " [collapsed]" });
    }
    if !node.value.is_empty() && node.value != node.name {
        let val = clip(&node.value, 60);
        line.push_str(&format!(" value=\"{}\"", val));
    }

    output.push_str(&line);
    output.push('\n');

    for child in &node.children {
        render_node(output, child, indent + 1, compact, max_depth);
    }
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let clipped: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: &str, name: &str, interactive: bool) -> AxNode {
        AxNode {
            role: role.into(),
            name: name.into(),
            value: String::new(),
            backend_node_id: Some(10),
            uid: None,
            children: vec![],
            interactive,
            focused: false,
            checked: None,
            disabled: false,
            expanded: None,
            level: None,
        }
    }

    #[test]
    fn interactive_roles_cover_the_basics() {
        assert!(INTERACTIVE_ROLES.contains(&"button"));
        assert!(INTERACTIVE_ROLES.contains(&"textbox"));
        assert!(INTERACTIVE_ROLES.contains(&"link"));
        assert!(!INTERACTIVE_ROLES.contains(&"generic"));
    }

    #[test]
    fn uids_are_numeric_and_sequential() {
        let mut nodes = vec![node("button", "Submit", true), node("link", "Docs", true)];
        let (counter, uids) = assign_uids(&mut nodes, 0, true);
        assert_eq!(counter, 2);
        assert_eq!(nodes[0].uid, Some(1));
        assert_eq!(nodes[1].uid, Some(2));
        assert_eq!(uids.get(&1).unwrap().name, "Submit");
        assert_eq!(uids.get(&2).unwrap().role, "link");
    }

    #[test]
    fn uid_counter_continues_across_calls() {
        let mut first = vec![node("button", "A", true)];
        let (counter, _) = assign_uids(&mut first, 0, true);
        let mut second = vec![node("button", "B", true)];
        let (counter, uids) = assign_uids(&mut second, counter, true);
        assert_eq!(counter, 2);
        assert!(uids.contains_key(&2));
    }

    #[test]
    fn render_includes_uid_annotations() {
        let mut nodes = vec![node("heading", "Example Domain", false)];
        nodes[0].level = Some(1);
        let (_, _) = assign_uids(&mut nodes, 0, false);
        let text = render_tree(&nodes, false, None);
        assert!(text.contains("heading \"Example Domain\" [uid=1] [level=1]"));
    }

    #[test]
    fn compact_mode_skips_empty_structural_nodes() {
        let mut container = node("generic", "", false);
        container.backend_node_id = None;
        let mut button = node("button", "Click me", true);
        button.uid = Some(1);
        container.children.push(button);

        let text = render_tree(&[container], true, None);
        assert!(!text.contains("generic"));
        assert!(text.contains("button \"Click me\" [uid=1]"));
    }

    #[test]
    fn long_names_are_clipped() {
        let long = "x".repeat(200);
        let nodes = vec![node("button", &long, true)];
        let text = render_tree(&nodes, false, None);
        assert!(text.contains("..."));
        assert!(text.len() < 200);
    }
}
