#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = project_bundles::rocket();
    log::info!("starting project bundles server");
    rocket
}
