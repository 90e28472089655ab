//! 设备数据格式辅助函数

/// 解析设备时长字符串（如 `2w1d`、`1h30m`、`50s`）为秒数
///
/// 逐个累加 `数值 * 单位秒数`，无法识别的字符被忽略。
pub fn parse_uptime(uptime: &str) -> u64 {
    let mut total: u64 = 0;
    let mut current: u64 = 0;

    for ch in uptime.chars() {
        if let Some(digit) = ch.to_digit(10) {
            current = current.saturating_mul(10).saturating_add(digit as u64);
            continue;
        }

        let unit = match ch {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => 0,
        };
        total = total.saturating_add(current.saturating_mul(unit));
        current = 0;
    }

    total
}

/// 解析简单队列的 `rate` 字段（`"<上行bps>/<下行bps>"`）为 Mbps
pub fn parse_queue_rate(rate: &str) -> Option<(f64, f64)> {
    let (up, down) = rate.split_once('/')?;
    let up: f64 = up.trim().parse().ok()?;
    let down: f64 = down.trim().parse().ok()?;
    Some((round2(up / 1_000_000.0), round2(down / 1_000_000.0)))
}

/// 生成限速字符串 `"<上行>M/<下行>M"`
pub fn format_rate_limit(upload_mbps: u32, download_mbps: u32) -> String {
    format!("{}M/{}M", upload_mbps, download_mbps)
}

/// 设备布尔值（`true`/`yes`）
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(value.map(|v| v.trim().to_ascii_lowercase()).as_deref(), Some("true") | Some("yes"))
}

/// 规范化 MAC 地址；全零或空字符串视为未绑定
pub fn normalize_mac(mac: Option<&str>) -> Option<String> {
    let mac = mac?.trim();
    if mac.is_empty() || mac == "00:00:00:00:00:00" {
        return None;
    }
    Some(mac.to_ascii_uppercase())
}

/// 剥离 PPPoE 动态接口名的尖括号（`<pppoe-alice>` -> `alice`）
pub fn pppoe_user_from_interface(name: &str) -> &str {
    name.strip_prefix("<pppoe-")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(name)
}

/// 按时间差计算平均速率（Mbps），时间差最少按 1 秒计
pub fn speed_mbps(delta_bytes: u64, elapsed_secs: f64) -> f64 {
    let elapsed = if elapsed_secs < 1.0 { 1.0 } else { elapsed_secs };
    round2((delta_bytes as f64 * 8.0) / (elapsed * 1_000_000.0))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("2w1d"), 2 * 604_800 + 86_400);
        assert_eq!(parse_uptime("1h30m"), 5_400);
        assert_eq!(parse_uptime("50s"), 50);
        assert_eq!(parse_uptime("1d02:03:04"), 86_400);
        assert_eq!(parse_uptime(""), 0);
        assert_eq!(parse_uptime("garbage"), 0);
    }

    #[test]
    fn test_parse_queue_rate() {
        assert_eq!(parse_queue_rate("1500000/12345678"), Some((1.5, 12.35)));
        assert_eq!(parse_queue_rate("0/0"), Some((0.0, 0.0)));
        assert_eq!(parse_queue_rate("bogus"), None);
    }

    #[test]
    fn test_mac_and_flags() {
        assert_eq!(normalize_mac(Some("00:00:00:00:00:00")), None);
        assert_eq!(normalize_mac(Some(" aa:bb:cc:dd:ee:ff ")), Some("AA:BB:CC:DD:EE:FF".to_string()));
        assert!(is_truthy(Some("yes")));
        assert!(is_truthy(Some("true")));
        assert!(!is_truthy(Some("false")));
        assert!(!is_truthy(None));
    }

    #[test]
    fn test_speed_clamps_elapsed() {
        assert_eq!(speed_mbps(1_000_000, 0.0), 8.0);
        assert_eq!(speed_mbps(1_000_000, 2.0), 4.0);
        assert_eq!(pppoe_user_from_interface("<pppoe-alice>"), "alice");
        assert_eq!(pppoe_user_from_interface("ether1"), "ether1");
    }
}
