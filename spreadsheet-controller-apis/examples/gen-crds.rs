use kube::CustomResourceExt;
use serde_yaml;
use spreadsheet_controller_apis::Spreadsheet;

pub fn main() {
    println!("{}", serde_yaml::to_string(&Spreadsheet::crd()).unwrap());
}
