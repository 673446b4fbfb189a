//! Unit tests for Cluster and Feature validation

use multicloud_operator::controller::validation::{
    validate_admin_services, validate_cluster, validate_feature,
};

use crate::common::*;

mod cluster_validation_tests {
    use super::*;

    #[test]
    fn test_valid_cluster() {
        let cluster = test_cluster(
            "prod",
            "team-a",
            vec![admin_service("metrics", 1), admin_service("logging", 2)],
        );
        assert!(validate_cluster(&cluster).is_ok());
    }

    #[test]
    fn test_cluster_without_admin_services_is_valid() {
        assert!(validate_cluster(&test_cluster("prod", "team-a", vec![])).is_ok());
    }

    #[test]
    fn test_empty_region_rejected() {
        let mut cluster = test_cluster("prod", "team-a", vec![]);
        cluster.spec.region = "  ".to_string();

        let err = validate_cluster(&cluster).unwrap_err();
        assert!(err.is_critical());
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_duplicate_admin_service_rejected() {
        let cluster = test_cluster(
            "prod",
            "team-a",
            vec![admin_service("metrics", 1), admin_service("metrics", 2)],
        );
        let err = validate_cluster(&cluster).unwrap_err();
        assert!(err.is_critical());
        assert!(err.to_string().contains("more than once"));
    }
}

mod admin_service_validation_tests {
    use super::*;

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "Metrics", "metrics_v2", "-metrics", "metrics-"] {
            let result = validate_admin_services(&[admin_service(name, 0)]);
            assert!(result.is_err(), "name {name:?} should be rejected");
        }
    }

    #[test]
    fn test_missing_kind_rejected() {
        let mut service = admin_service("metrics", 0);
        service.kind = String::new();
        let err = validate_admin_services(&[service]).unwrap_err();
        assert!(err.to_string().contains("service kind"));
    }

    #[test]
    fn test_equal_priorities_allowed() {
        let services = vec![admin_service("metrics", 1), admin_service("logging", 1)];
        assert!(validate_admin_services(&services).is_ok());
    }
}

mod feature_validation_tests {
    use super::*;

    #[test]
    fn test_valid_feature() {
        let feature = test_feature("mesh", "team-a", "prod", vec![admin_service("istio", 0)]);
        assert!(validate_feature(&feature).is_ok());
    }

    #[test]
    fn test_feature_without_cluster_rejected() {
        let feature = test_feature("mesh", "team-a", "", vec![]);
        let err = validate_feature(&feature).unwrap_err();
        assert!(err.is_critical());
    }
}
