//! 地理计算模块
//! 解析NMEA GPGGA定位语句，计算大圆距离并选择最近基准站

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ProtocolError;
use crate::config::StationConfig;

/// 地球平均半径（米）
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// GPGGA定位结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GgaFix {
    /// UTC时间（hhmmss.ss，原样保留）
    pub time: String,
    /// 纬度（十进制度，南纬为负）
    pub latitude: f64,
    /// 经度（十进制度，西经为负）
    pub longitude: f64,
    /// 定位质量（0-8）
    pub fix_quality: u8,
    /// 可见卫星数
    pub satellites: u32,
    /// 水平精度因子
    pub hdop: Option<f64>,
    /// 海拔高度
    pub altitude: Option<f64>,
    /// 海拔单位
    pub altitude_unit: Option<String>,
    /// 大地水准面差距
    pub geoid_separation: Option<f64>,
    /// 大地水准面差距单位
    pub geoid_unit: Option<String>,
    /// 距上次DGPS更新的秒数
    pub dgps_age: Option<f64>,
    /// DGPS基准站编号
    pub dgps_station: Option<String>,
}

/// 解析NMEA格式坐标（DDDMM.MMMM）为十进制度
pub fn parse_lat_lon(raw: &str) -> Result<f64, ProtocolError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| ProtocolError::InvalidCoordinate(raw.to_string()))?;
    if !value.is_finite() {
        return Err(ProtocolError::InvalidCoordinate(raw.to_string()));
    }

    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    Ok(degrees + minutes / 60.0)
}

/// 解析单条GPGGA/GNGGA语句
///
/// 校验和不匹配仅记录警告，语句仍会被解析。
pub fn parse_gpgga(sentence: &str) -> Result<GgaFix, ProtocolError> {
    let sentence = sentence.trim();

    // 按 '*' 分离数据与两位十六进制校验和
    let (data, checksum) = sentence
        .split_once('*')
        .ok_or(ProtocolError::MissingChecksum)?;

    // 对 '$' 之后的所有字符做异或校验
    let payload = data.strip_prefix('$').unwrap_or(data);
    let computed = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    let expected = format!("{:02X}", computed);
    if !checksum.trim().eq_ignore_ascii_case(&expected) {
        warn!(
            sentence = %sentence,
            expected = %expected,
            provided = %checksum.trim(),
            "GGA checksum mismatch, sentence accepted anyway"
        );
    }

    let fields: Vec<&str> = data.split(',').collect();
    if fields.len() < 15 {
        return Err(ProtocolError::TruncatedSentence(fields.len()));
    }
    if fields[0] != "$GPGGA" && fields[0] != "$GNGGA" {
        return Err(ProtocolError::UnsupportedTalker(fields[0].to_string()));
    }

    if fields[2].is_empty() || fields[4].is_empty() {
        return Err(ProtocolError::EmptyPosition);
    }

    let mut latitude = parse_lat_lon(fields[2])?;
    if fields[3].eq_ignore_ascii_case("S") {
        latitude = -latitude;
    }
    let mut longitude = parse_lat_lon(fields[4])?;
    if fields[5].eq_ignore_ascii_case("W") {
        longitude = -longitude;
    }

    // 剩余字段按宽松方式解析，缺失或非法时取默认值
    let fix_quality = fields[6]
        .parse::<u8>()
        .ok()
        .filter(|q| *q <= 8)
        .unwrap_or(0);
    let satellites = fields[7].parse::<u32>().unwrap_or(0);

    Ok(GgaFix {
        time: fields[1].to_string(),
        latitude,
        longitude,
        fix_quality,
        satellites,
        hdop: fields[8].parse().ok(),
        altitude: fields[9].parse().ok(),
        altitude_unit: non_empty(fields[10]),
        geoid_separation: fields[11].parse().ok(),
        geoid_unit: non_empty(fields[12]),
        dgps_age: fields[13].parse().ok(),
        dgps_station: non_empty(fields[14]),
    })
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// 两点间大圆距离（米），haversine公式
pub fn haversine_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;

    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// 在候选基准站中选择距给定位置最近的一个
///
/// 仅考虑 active 且坐标有限的基准站；并列时取迭代顺序靠前者。
pub fn find_closest_station(
    latitude: f64,
    longitude: f64,
    stations: &[StationConfig],
) -> Option<(StationConfig, f64)> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }

    let mut closest: Option<(&StationConfig, f64)> = None;
    for station in stations {
        if !station.active || !station.latitude.is_finite() || !station.longitude.is_finite() {
            continue;
        }
        let distance = haversine_distance(
            (latitude, longitude),
            (station.latitude, station.longitude),
        );
        match closest {
            Some((_, best)) if distance >= best => {}
            _ => closest = Some((station, distance)),
        }
    }

    closest.map(|(station, distance)| (station.clone(), distance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(mount: &str, lat: f64, lon: f64, active: bool) -> StationConfig {
        StationConfig {
            mount_point: mount.to_string(),
            host: "caster.example.com".to_string(),
            port: 2101,
            username: None,
            password: None,
            latitude: lat,
            longitude: lon,
            active,
        }
    }

    #[test]
    fn test_parse_lat_lon() {
        // 4807.038 = 48度 + 7.038分
        let value = parse_lat_lon("4807.038").unwrap();
        assert!((value - (48.0 + 7.038 / 60.0)).abs() < 1e-9);

        let value = parse_lat_lon("12158.3416").unwrap();
        assert!((value - (121.0 + 58.3416 / 60.0)).abs() < 1e-9);

        assert!(parse_lat_lon("abc").is_err());
        assert!(parse_lat_lon("NaN").is_err());
        assert!(parse_lat_lon("inf").is_err());
    }

    #[test]
    fn test_parse_gpgga_valid() {
        let fix = parse_gpgga("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47")
            .unwrap();
        assert_eq!(fix.time, "123519");
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.516_666).abs() < 1e-4);
        assert_eq!(fix.fix_quality, 1);
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.hdop, Some(0.9));
        assert_eq!(fix.altitude, Some(545.4));
        assert_eq!(fix.altitude_unit.as_deref(), Some("M"));
        assert_eq!(fix.geoid_separation, Some(46.9));
        assert_eq!(fix.dgps_age, None);
        assert_eq!(fix.dgps_station, None);
    }

    #[test]
    fn test_parse_gngga_accepted() {
        let fix = parse_gpgga("$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*59")
            .unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
    }

    #[test]
    fn test_parse_gpgga_hemisphere_signs() {
        let fix = parse_gpgga("$GPGGA,123519,4807.038,S,01131.000,W,1,08,0.9,545.4,M,46.9,M,,*48")
            .unwrap();
        assert!(fix.latitude < 0.0);
        assert!(fix.longitude < 0.0);
    }

    #[test]
    fn test_parse_gpgga_checksum_mismatch_still_parses() {
        // 校验和故意偏移一位，坐标仍应被提取
        let fix = parse_gpgga("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48")
            .unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
    }

    #[test]
    fn test_parse_gpgga_missing_checksum_rejected() {
        let err = parse_gpgga("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert!(matches!(err, Err(ProtocolError::MissingChecksum)));
    }

    #[test]
    fn test_parse_gpgga_empty_position_rejected() {
        let err = parse_gpgga("$GPGGA,170834,,N,12158.3416,W,1,07,1.0,9.0,M,-25.7,M,,*5A");
        assert!(matches!(err, Err(ProtocolError::EmptyPosition)));
    }

    #[test]
    fn test_parse_gpgga_truncated_rejected() {
        let err = parse_gpgga("$GPGGA,123519,4807.038,N*6B");
        assert!(matches!(err, Err(ProtocolError::TruncatedSentence(_))));
    }

    #[test]
    fn test_parse_gpgga_wrong_talker_rejected() {
        let err = parse_gpgga("$GPRMC,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*59");
        assert!(matches!(err, Err(ProtocolError::UnsupportedTalker(_))));
    }

    #[test]
    fn test_parse_gpgga_defensive_defaults() {
        // 质量与卫星数字段非法时回退为0
        let fix = parse_gpgga("$GPGGA,123519,4807.038,N,01131.000,E,9,xx,,,,,,,*47").unwrap();
        assert_eq!(fix.fix_quality, 0);
        assert_eq!(fix.satellites, 0);
        assert_eq!(fix.hdop, None);
        assert_eq!(fix.altitude, None);
    }

    #[test]
    fn test_haversine_known_distance() {
        // 巴黎 - 伦敦约344公里
        let d = haversine_distance((48.8566, 2.3522), (51.5074, -0.1278));
        assert!((d - 344_000.0).abs() < 2_000.0, "distance was {}", d);

        // 同一点距离为0
        assert_eq!(haversine_distance((37.5, -122.0), (37.5, -122.0)), 0.0);
    }

    #[test]
    fn test_find_closest_station() {
        let stations = vec![
            station("FAR", 40.0, -120.0, true),
            station("NEAR", 37.5, -122.0, true),
        ];
        // 位置约(37.387,-121.972)，离NEAR约2.8公里
        let (chosen, distance) = find_closest_station(37.387458, -121.97236, &stations).unwrap();
        assert_eq!(chosen.mount_point, "NEAR");
        assert!(distance < 15_000.0);
    }

    #[test]
    fn test_find_closest_skips_inactive() {
        let stations = vec![
            station("OFF", 37.5, -122.0, false),
            station("ON", 40.0, -120.0, true),
        ];
        let (chosen, _) = find_closest_station(37.5, -122.0, &stations).unwrap();
        assert_eq!(chosen.mount_point, "ON");
    }

    #[test]
    fn test_find_closest_skips_non_finite_coords() {
        let stations = vec![
            station("BAD", f64::NAN, -122.0, true),
            station("GOOD", 40.0, -120.0, true),
        ];
        let (chosen, _) = find_closest_station(37.5, -122.0, &stations).unwrap();
        assert_eq!(chosen.mount_point, "GOOD");
    }

    #[test]
    fn test_find_closest_empty_or_invalid_input() {
        assert!(find_closest_station(37.5, -122.0, &[]).is_none());

        let stations = vec![station("A", 37.5, -122.0, true)];
        assert!(find_closest_station(f64::NAN, -122.0, &stations).is_none());
        assert!(find_closest_station(37.5, f64::INFINITY, &stations).is_none());
    }

    #[test]
    fn test_find_closest_tie_break_first() {
        let stations = vec![
            station("FIRST", 37.5, -122.0, true),
            station("SECOND", 37.5, -122.0, true),
        ];
        let (chosen, _) = find_closest_station(37.5, -122.0, &stations).unwrap();
        assert_eq!(chosen.mount_point, "FIRST");
    }
}
