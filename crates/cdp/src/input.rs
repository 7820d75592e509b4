//! Input synthesis helpers: key chord parsing, element geometry, and the
//! platform select-all chord used before replacing text in an input.

use serde_json::Value;

pub const MOD_ALT: i32 = 1;
pub const MOD_CTRL: i32 = 2;
pub const MOD_META: i32 = 4;
pub const MOD_SHIFT: i32 = 8;

/// Parse a key specification like "Enter", "Tab", "Ctrl+A".
/// Returns (key, code, modifiers).
pub fn parse_key_spec(key: &str) -> (String, String, i32) {
    let parts: Vec<&str> = key.split('+').collect();
    let mut modifiers = 0i32;
    let mut main_key = key.to_string();

    if parts.len() > 1 {
        for &part in &parts[..parts.len() - 1] {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= MOD_CTRL,
                "alt" | "option" => modifiers |= MOD_ALT,
                "shift" => modifiers |= MOD_SHIFT,
                "meta" | "cmd" | "command" => modifiers |= MOD_META,
                _ => {}
            }
        }
        main_key = parts.last().unwrap_or(&key).to_string();
    }

    let code = match main_key.as_str() {
        "Enter" | "Return" => "Enter",
        "Tab" => "Tab",
        "Escape" | "Esc" => "Escape",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "ArrowUp" | "Up" => "ArrowUp",
        "ArrowDown" | "Down" => "ArrowDown",
        "ArrowLeft" | "Left" => "ArrowLeft",
        "ArrowRight" | "Right" => "ArrowRight",
        "Home" => "Home",
        "End" => "End",
        "PageUp" => "PageUp",
        "PageDown" => "PageDown",
        "Space" | " " => "Space",
        _ => {
            if main_key.len() == 1 {
                return (
                    main_key.clone(),
                    format!("Key{}", main_key.to_uppercase()),
                    modifiers,
                );
            }
            &main_key
        }
    }
    .to_string();

    (main_key, code, modifiers)
}

/// The platform-appropriate select-all chord: Meta+A on macOS hosts,
/// Ctrl+A elsewhere. Text entry selects-then-deletes before typing so
/// framework-managed inputs that ignore direct value assignment still end
/// up with exactly the requested text.
pub fn select_all_chord(platform: &str) -> (String, String, i32) {
    let modifiers = if platform == "macos" { MOD_META } else { MOD_CTRL };
    ("a".to_string(), "KeyA".to_string(), modifiers)
}

/// Center of the first content quad: [x1,y1, x2,y2, x3,y3, x4,y4].
pub fn center_from_quads(result: &Value) -> Option<(f64, f64)> {
    let quad = result
        .get("quads")
        .and_then(|q| q.as_array())
        .and_then(|quads| quads.first())
        .and_then(|q| q.as_array())?;
    if quad.len() < 8 {
        return None;
    }
    let xs: Vec<f64> = quad.iter().step_by(2).filter_map(|v| v.as_f64()).collect();
    let ys: Vec<f64> = quad
        .iter()
        .skip(1)
        .step_by(2)
        .filter_map(|v| v.as_f64())
        .collect();
    if xs.len() < 4 || ys.len() < 4 {
        return None;
    }
    let cx = xs.iter().sum::<f64>() / xs.len() as f64;
    let cy = ys.iter().sum::<f64>() / ys.len() as f64;
    // Zero-area quads mean the element is not on screen.
    if (xs[0] - xs[1]).abs() < f64::EPSILON && (ys[0] - ys[2]).abs() < f64::EPSILON {
        return None;
    }
    Some((cx, cy))
}

/// Box model fallback: center of the content box.
pub fn center_from_box_model(result: &Value) -> Option<(f64, f64)> {
    let content = result
        .get("model")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())?;
    if content.len() < 8 {
        return None;
    }
    let x1 = content[0].as_f64()?;
    let y1 = content[1].as_f64()?;
    let x2 = content[4].as_f64()?;
    let y2 = content[5].as_f64()?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_keys_have_no_modifiers() {
        let (key, code, mods) = parse_key_spec("Enter");
        assert_eq!(key, "Enter");
        assert_eq!(code, "Enter");
        assert_eq!(mods, 0);
    }

    #[test]
    fn chords_accumulate_modifier_bits() {
        let (key, code, mods) = parse_key_spec("Ctrl+A");
        assert_eq!(key, "A");
        assert_eq!(code, "KeyA");
        assert_eq!(mods, MOD_CTRL);

        let (key, code, mods) = parse_key_spec("Ctrl+Shift+Tab");
        assert_eq!(key, "Tab");
        assert_eq!(code, "Tab");
        assert_eq!(mods, MOD_CTRL | MOD_SHIFT);
    }

    #[test]
    fn select_all_matches_platform() {
        assert_eq!(select_all_chord("macos").2, MOD_META);
        assert_eq!(select_all_chord("linux").2, MOD_CTRL);
        assert_eq!(select_all_chord("windows").2, MOD_CTRL);
    }

    #[test]
    fn quad_center_is_geometric_mean() {
        let result = json!({
            "quads": [[10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]],
        });
        let (x, y) = center_from_quads(&result).unwrap();
        assert!((x - 60.0).abs() < 0.01);
        assert!((y - 40.0).abs() < 0.01);
    }

    #[test]
    fn zero_area_quad_is_rejected() {
        let result = json!({
            "quads": [[10.0, 20.0, 10.0, 20.0, 10.0, 20.0, 10.0, 20.0]],
        });
        assert!(center_from_quads(&result).is_none());
    }

    #[test]
    fn empty_quads_are_rejected() {
        assert!(center_from_quads(&json!({"quads": []})).is_none());
        assert!(center_from_quads(&json!({})).is_none());
    }

    #[test]
    fn box_model_center_fallback() {
        let result = json!({
            "model": {
                "content": [10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0],
            },
        });
        let (x, y) = center_from_box_model(&result).unwrap();
        assert!((x - 60.0).abs() < 0.01);
        assert!((y - 40.0).abs() < 0.01);
    }
}
