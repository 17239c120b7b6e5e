use kube::CustomResourceExt as _;
use mongodb_cluster::api::v1::mongodbcluster::MongoDBCluster;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MongoDBCluster::crd())?);
    Ok(())
}
