use std::net::Ipv4Addr;
use std::time::Duration;

use ppp_rust::config::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_parse_secrets_plain_and_hex() {
        let secrets = parse_secrets("alpha:s3cret, beta:hex:DE:AD:be:ef ,").unwrap();
        assert_eq!(secrets.len(), 2, "пустой элемент пропускается");
        assert_eq!(secrets[0], ("alpha".to_string(), b"s3cret".to_vec()));
        assert_eq!(secrets[1], ("beta".to_string(), vec![0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    pub fn test_parse_secrets_rejects_bad_entries() {
        assert!(parse_secrets("nocolon").is_err(), "нет разделителя name:secret");
        assert!(parse_secret("hex:zz").is_err(), "невалидный hex");
    }

    #[test]
    pub fn test_secret_lookup_with_wildcard() {
        let config = LinkConfig {
            secrets: vec![("peer".into(), b"one".to_vec()), ("*".into(), b"any".to_vec())],
            ..LinkConfig::default()
        };
        assert_eq!(config.secret_for("peer"), Some(b"one".to_vec()));
        assert_eq!(config.secret_for("stranger"), Some(b"any".to_vec()));
        assert_eq!(LinkConfig::default().secret_for("peer"), None);
    }

    // единственный тест в этом бинаре, трогающий окружение
    #[test]
    pub fn test_from_env() {
        std::env::set_var("PPP_BIND", "0.0.0.0:6000");
        std::env::set_var("PPP_PEER", "10.1.1.1:6001");
        std::env::set_var("PPP_LOCAL_IP", "10.0.0.1");
        std::env::set_var("PPP_REQUIRE_CHAP", "yes");
        std::env::set_var("PPP_ECHO_INTERVAL", "1.5");
        std::env::set_var("PPP_SECRETS", "peer:pw");
        std::env::set_var("PPP_MRU", "1400");

        let c = from_env().unwrap();
        assert_eq!(c.bind, "0.0.0.0:6000");
        assert_eq!(c.peer, "10.1.1.1:6001");
        assert_eq!(c.local_ip, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(c.remote_ip, None);
        assert!(c.require_chap);
        assert_eq!(c.echo_interval, Duration::from_millis(1500));
        assert_eq!(c.mru, 1400);
        assert_eq!(c.secret_for("peer"), Some(b"pw".to_vec()));

        std::env::set_var("PPP_MRU", "64");
        assert!(from_env().is_err(), "MRU ниже минимума");
        std::env::set_var("PPP_MRU", "1400");

        std::env::set_var("PPP_ECHO_INTERVAL", "-1");
        assert!(from_env().is_err(), "отрицательный интервал");
        std::env::remove_var("PPP_ECHO_INTERVAL");

        std::env::set_var("PPP_REQUIRE_CHAP", "maybe");
        assert!(from_env().is_err(), "не булево значение");
    }
}
