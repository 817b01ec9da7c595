use dbhub_database::crd::Database;
use dbhub_gateway::crd::DBHubInstance;

use kube::CustomResourceExt;

fn main() {
    for crd in vec![Database::crd(), DBHubInstance::crd()] {
        // safe unwrap: we know CRD is serializable
        print!("---\n{}\n", serde_yaml::to_string(&crd).unwrap());
    }
}
