//! OpenStack client against a local fake of the Keystone, Nova and Neutron APIs

use pcd_cloud::{CloudApi, CloudError, Credentials, OpenStackClient};
use serde_json::{json, Value};
use std::net::SocketAddr;
use warp::http::StatusCode;
use warp::Filter;

const TOKEN: &str = "tok-1";

fn catalog(host: &str) -> Value {
    let service = |kind: &str, path: &str| {
        json!({
            "type": kind,
            "endpoints": [
                {"interface": "admin", "region": "RegionOne", "url": "http://unused.invalid"},
                {"interface": "public", "region": "RegionOne", "url": format!("http://{host}/{path}")}
            ]
        })
    };
    json!({
        "token": {
            "catalog": [
                service("compute", "compute/v2.1"),
                service("network", "network"),
                service("image", "image"),
            ]
        }
    })
}

fn nova_server(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "status": "ACTIVE",
        "OS-EXT-STS:vm_state": "active",
        "created": "2024-03-01T10:00:00Z",
        "addresses": {"TestPC": [{"addr": "10.0.0.7", "OS-EXT-IPS:type": "fixed"}]},
        "metadata": {"build_name": name}
    })
}

async fn spawn_fake_openstack() -> SocketAddr {
    let auth = warp::post()
        .and(warp::path!("v3" / "auth" / "tokens"))
        .and(warp::header::<String>("host"))
        .and(warp::body::json())
        .map(|host: String, body: Value| {
            let user = &body["auth"]["identity"]["password"]["user"];
            let status = if user["name"] == "deployer" && user["password"] == "s3cret" {
                StatusCode::CREATED
            } else {
                StatusCode::UNAUTHORIZED
            };
            warp::reply::with_status(
                warp::reply::with_header(warp::reply::json(&catalog(&host)), "X-Subject-Token", TOKEN),
                status,
            )
        });

    let authorized = warp::header::exact("x-auth-token", TOKEN);

    let servers = warp::get()
        .and(warp::path!("compute" / "v2.1" / "servers" / "detail"))
        .and(authorized.clone())
        .map(|| {
            warp::reply::json(&json!({
                "servers": [nova_server("s-1", "nightly-old"), nova_server("s-2", "nightly")]
            }))
        });

    let keypair = warp::get()
        .and(warp::path!("compute" / "v2.1" / "os-keypairs" / String))
        .and(authorized.clone())
        .map(|name: String| {
            let status = if name == "PCMain" { StatusCode::OK } else { StatusCode::NOT_FOUND };
            warp::reply::with_status(
                warp::reply::json(&json!({"keypair": {"name": name}})),
                status,
            )
        });

    let limits = warp::get()
        .and(warp::path!("compute" / "v2.1" / "limits"))
        .and(authorized.clone())
        .map(|| {
            warp::reply::json(&json!({
                "limits": {"absolute": {"totalRAMUsed": 8192, "maxTotalRAMSize": 51200}, "rate": []}
            }))
        });

    let floating_ips = warp::get()
        .and(warp::path!("network" / "v2.0" / "floatingips"))
        .and(authorized.clone())
        .map(|| {
            warp::reply::json(&json!({
                "floatingips": [
                    {"id": "f-1", "floating_ip_address": "142.1.0.1", "port_id": "p-9"},
                    {"id": "f-2", "floating_ip_address": "142.1.0.2", "port_id": null}
                ]
            }))
        });

    let routes = auth.or(servers).or(keypair).or(limits).or(floating_ips);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn credentials(addr: SocketAddr, password: &str) -> Credentials {
    Credentials {
        auth_url: format!("http://{addr}"),
        username: "deployer".to_string(),
        password: password.to_string(),
        project_name: "pc".to_string(),
        user_domain_name: "Default".to_string(),
        project_domain_name: "Default".to_string(),
        region_name: Some("RegionOne".to_string()),
        identity_api_version: Some("3".to_string()),
    }
}

#[tokio::test]
async fn authenticates_and_queries_services() {
    let addr = spawn_fake_openstack().await;
    let client = OpenStackClient::connect(&credentials(addr, "s3cret")).await.unwrap();

    let server = client.find_server("nightly").await.unwrap().unwrap();
    assert_eq!(server.id, "s-2");
    assert!(client.find_server("nightly-new").await.unwrap().is_none());

    assert_eq!(client.find_keypair("PCMain").await.unwrap().as_deref(), Some("PCMain"));
    assert_eq!(client.find_keypair("Other").await.unwrap(), None);

    let limits = client.absolute_limits().await.unwrap();
    assert_eq!(limits["totalRAMUsed"], 8192);

    let free = client.find_available_floating_ip().await.unwrap().unwrap();
    assert_eq!(free.id, "f-2");
}

#[tokio::test]
async fn rejected_credentials_are_an_api_error() {
    let addr = spawn_fake_openstack().await;

    let err = OpenStackClient::connect(&credentials(addr, "wrong")).await.unwrap_err();

    match err {
        CloudError::Api { status, method, .. } => {
            assert_eq!(status, 401);
            assert_eq!(method, "POST");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}
