use super::configmap::{config_path, CONFIG_DIR, CREDENTIALS_DIR, METRICS_PORT};
use super::labels;
use crate::reconcile::DesiredState;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

const CONFIG_VOLUME: &str = "config";
const CREDENTIALS_VOLUME: &str = "creds";

/// Deployment running cloudflared with the synced secret and config map mounted.
pub fn build(
    desired: &DesiredState,
    secret: &Secret,
    config_map: &ConfigMap,
    image: &str,
) -> Deployment {
    let labels = labels(&desired.name);

    let volumes = vec![
        Volume {
            name: CREDENTIALS_VOLUME.to_owned(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name_any()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        },
        Volume {
            name: CONFIG_VOLUME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.name_any(),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
    ];

    let volume_mounts = vec![
        VolumeMount {
            name: CREDENTIALS_VOLUME.to_owned(),
            mount_path: CREDENTIALS_DIR.to_owned(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
        VolumeMount {
            name: CONFIG_VOLUME.to_owned(),
            mount_path: CONFIG_DIR.to_owned(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
    ];

    let liveness_probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ready".to_owned()),
            port: IntOrString::Int(METRICS_PORT),
            ..HTTPGetAction::default()
        }),
        failure_threshold: Some(1),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        ..Probe::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(desired.name.clone()),
            namespace: Some(desired.namespace.clone()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(desired.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "cloudflared".to_owned(),
                        image: Some(image.to_owned()),
                        args: Some(vec![
                            "tunnel".to_owned(),
                            "--config".to_owned(),
                            config_path(),
                            "run".to_owned(),
                        ]),
                        volume_mounts: Some(volume_mounts),
                        liveness_probe: Some(liveness_probe),
                        ..Container::default()
                    }],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}
