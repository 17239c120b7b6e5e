#[cfg(test)]
mod tests {
    use crate::api::v1::mongodbcluster::{LocalRef, MongoDBCluster, MongoDBClusterSpec, Security, TlsSpec};
    use crate::config::OperatorConfig;
    use crate::controllers::cluster_controller::State;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::{Api, ObjectMeta, Patch, PatchParams};
    use kube::Client;

    #[tokio::test]
    #[ignore = "uses k8s current-context"]
    async fn integration_reconcile_stages_tls_material() {
        let client = Client::try_default().await.unwrap();
        let ctx = State::new(OperatorConfig::default())
            .unwrap()
            .to_context(client.clone());

        // expects secret `tls-certificate` and configmap `tls-ca` in the default namespace
        let cluster = MongoDBCluster {
            metadata: ObjectMeta {
                name: Some("test-cluster".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: MongoDBClusterSpec {
                members: 3,
                version: "6.0.5".to_string(),
                feature_compatibility_version: None,
                security: Security {
                    tls: TlsSpec {
                        enabled: true,
                        optional: false,
                        certificate_key_secret_ref: LocalRef {
                            name: "tls-certificate".to_string(),
                        },
                        ca_config_map_ref: LocalRef {
                            name: "tls-ca".to_string(),
                        },
                    },
                },
            },
            status: None,
        };

        let clusters: Api<MongoDBCluster> = Api::namespaced(client.clone(), "default");
        let ssapply = PatchParams::apply("ctrltest").force();
        clusters
            .patch("test-cluster", &ssapply, &Patch::Apply(&cluster))
            .await
            .unwrap();

        let cluster = clusters.get("test-cluster").await.unwrap();
        cluster.reconcile(ctx).await.unwrap();

        let output = clusters.get("test-cluster").await.unwrap();
        assert!(output.status.is_some());

        let secrets: Api<Secret> = Api::namespaced(client.clone(), "default");
        let operator_secret = secrets.get("test-cluster-server-certificate-key").await.unwrap();
        assert_eq!(operator_secret.data.unwrap().len(), 1);

        let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), "default");
        let sts = statefulsets.get("test-cluster").await.unwrap();
        let volumes = sts.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert_eq!(volumes.len(), 5);
    }
}
