//! NTRIP 协议解析模块
//! 实现流动站侧请求的识别与响应构建
//!
//! 流动站客户端的首行格式可以预测，这里按前缀匹配请求行而不做完整HTTP解析。

use bytes::{BufMut, Bytes, BytesMut};

/// 订阅确认响应
pub const ICY_OK: &[u8] = b"ICY 200 OK\r\n\r\n";

/// 源列表中的位置描述
const SOURCETABLE_LOCATION: &str = "NTRIP Service";

/// 流动站请求类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoverRequest<'a> {
    /// 源列表请求（GET / ）
    Sourcetable,
    /// 挂载点订阅请求（GET /<mount>）
    Subscribe,
    /// NMEA定位上报（$GPGGA / $GNGGA）
    Position(&'a str),
    /// 未知请求
    Unknown(&'a str),
}

/// 按前缀识别流动站发来的一段文本
///
/// 识别顺序与匹配规则固定：先源列表，再配置的挂载点，再NMEA语句。
pub fn classify<'a>(text: &'a str, mount_point: &str) -> RoverRequest<'a> {
    if text.starts_with("GET / ") {
        return RoverRequest::Sourcetable;
    }
    if text.starts_with(&format!("GET /{}", mount_point)) {
        return RoverRequest::Subscribe;
    }
    if text.starts_with("$GPGGA") || text.starts_with("$GNGGA") {
        return RoverRequest::Position(text);
    }
    RoverRequest::Unknown(text)
}

/// 构建源列表响应
///
/// 仅公布配置的单一挂载点。
pub fn build_sourcetable(mount_point: &str) -> Bytes {
    let mut response = BytesMut::with_capacity(256);

    response.put_slice(b"SOURCETABLE 200 OK\r\n");
    response.put_slice(b"Content-Type: text/plain\r\n");
    response.put_slice(b"\r\n");
    response.put_slice(
        format!(
            "STR;{};{};RTCM 3;;2;GPS;NTRIP;USA;0;0;1;0;none;none;B;N;0;\r\n",
            mount_point, SOURCETABLE_LOCATION
        )
        .as_bytes(),
    );
    response.put_slice(b"ENDSOURCETABLE\r\n");

    response.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sourcetable() {
        assert_eq!(
            classify("GET / HTTP/1.0", "NEAREST"),
            RoverRequest::Sourcetable
        );
    }

    #[test]
    fn test_classify_subscribe() {
        assert_eq!(
            classify("GET /NEAREST HTTP/1.0", "NEAREST"),
            RoverRequest::Subscribe
        );
    }

    #[test]
    fn test_classify_position() {
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        assert_eq!(classify(gga, "NEAREST"), RoverRequest::Position(gga));

        let gngga = "$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*59";
        assert_eq!(classify(gngga, "NEAREST"), RoverRequest::Position(gngga));
    }

    #[test]
    fn test_classify_unknown() {
        // 请求其他挂载点视为未知请求
        assert!(matches!(
            classify("GET /OTHER HTTP/1.0", "NEAREST"),
            RoverRequest::Unknown(_)
        ));
        assert!(matches!(
            classify("POST /NEAREST HTTP/1.1", "NEAREST"),
            RoverRequest::Unknown(_)
        ));
    }

    #[test]
    fn test_build_sourcetable_format() {
        let table = build_sourcetable("NEAREST");
        let text = std::str::from_utf8(&table).unwrap();
        assert_eq!(
            text,
            "SOURCETABLE 200 OK\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             STR;NEAREST;NTRIP Service;RTCM 3;;2;GPS;NTRIP;USA;0;0;1;0;none;none;B;N;0;\r\n\
             ENDSOURCETABLE\r\n"
        );
    }
}
