//! Human-readable renderings of the execution layer for the CLI.

use super::ToolManager;
use super::registry::ToolCategory;
use std::fmt::Write as _;

/// Tools grouped by category, one line per tool.
pub fn render_tool_listing(manager: &ToolManager) -> String {
    let mut out = String::new();
    let registry = manager.registry();
    let _ = writeln!(out, "registered tools: {}", registry.len());
    for category in ToolCategory::all() {
        let tools = registry.list(Some(*category));
        if tools.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n[{}]", category.as_str());
        for tool in tools {
            let params: Vec<String> = tool
                .parameters
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.clone()
                    } else {
                        format!("{}?", p.name)
                    }
                })
                .collect();
            let _ = writeln!(
                out,
                "  {:<28} {}  ({})",
                tool.name,
                tool.description,
                params.join(", ")
            );
        }
    }
    out
}

/// Short status summary of the vehicle.
pub fn render_vehicle_summary(manager: &ToolManager) -> String {
    let s = manager.vehicle_snapshot();
    let mut out = String::new();
    let _ = writeln!(out, "engine: {}", if s.engine_running { "on" } else { "off" });
    let _ = writeln!(
        out,
        "climate: ac={} driver={}°C fan={}",
        if s.ac_on { "on" } else { "off" },
        s.temperature_c.get("driver").copied().unwrap_or(0.0),
        s.fan_speed
    );
    let _ = writeln!(
        out,
        "media: playing={} track={} volume={}",
        s.music_playing, s.current_track, s.volume
    );
    let _ = writeln!(
        out,
        "navigation: active={} destination={}",
        s.navigation_active, s.navigation_destination
    );
    let _ = writeln!(
        out,
        "energy: fuel={}% battery={}% range={}km",
        s.fuel_level_pct, s.battery_level_pct, s.range_km
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_mentions_every_category_with_tools() {
        let manager = ToolManager::new();
        let listing = render_tool_listing(&manager);
        assert!(listing.contains("[climate]"));
        assert!(listing.contains("set_temperature"));
        assert!(listing.contains("[navigation]"));
    }

    #[test]
    fn summary_tracks_state() {
        let manager = ToolManager::new();
        manager
            .execute("play_music", &serde_json::json!({"song": "晴天"}))
            .expect("ok");
        let summary = render_vehicle_summary(&manager);
        assert!(summary.contains("晴天"));
    }
}
