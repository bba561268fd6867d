use kube::CustomResourceExt;
use tunnel_controller::crd::tunnel::CloudflareTunnel;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&CloudflareTunnel::crd())?);
    Ok(())
}
