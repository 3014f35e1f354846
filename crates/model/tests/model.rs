use glk_core::{Announcer, Leadership, Participant, RelationStore, ResourceStore};
use glk_model::{HostModel, HOSTNAME_KEY, PORT_KEY};

const MODEL: &str = r#"
app: gitlab
unit: gitlab/0
leader: true
config:
  http_port: 8080
  external_hostname: ""
resources:
  gitlab_image: image.yaml
relations:
  - id: 1
    endpoint: mysql
    app: mariadb
    units: [mariadb/0]
    app_data: { database: gitlab }
    unit_data:
      mariadb/0: { host: 10.0.0.5, user: gl, password: pw }
  - id: 4
    endpoint: website
    app: haproxy
    units: [haproxy/0]
    local: { ingress-address: 10.1.1.1 }
"#;

fn temp_dir() -> std::path::PathBuf {
    let d = std::env::temp_dir().join(format!(
        "glk-model-{}",
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
    ));
    std::fs::create_dir_all(&d).unwrap();
    d
}

fn write_model() -> std::path::PathBuf {
    let d = temp_dir();
    std::fs::write(d.join("model.yaml"), MODEL).unwrap();
    std::fs::write(d.join("image.yaml"), "registrypath: r/gitlab\nusername: u\npassword: p\n").unwrap();
    d.join("model.yaml")
}

#[test]
fn relations_and_bags_are_served() {
    let m = HostModel::load(&write_model()).unwrap();
    assert_eq!(m.app(), "gitlab");
    let rels = m.relations("mysql");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].app.as_deref(), Some("mariadb"));
    assert_eq!(m.data_bag(&rels[0], Participant::App("mariadb")).get("database").map(String::as_str), Some("gitlab"));
    assert!(m.data_bag(&rels[0], Participant::App("other")).is_empty());
    assert_eq!(m.data_bag(&rels[0], Participant::Unit("mariadb/0")).get("user").map(String::as_str), Some("gl"));
    assert!(m.relations("pgsql").is_empty());
    assert!(m.is_leader());
}

#[test]
fn options_are_stringified() {
    let m = HostModel::load(&write_model()).unwrap();
    let o = m.options();
    assert_eq!(o.get("http_port").map(String::as_str), Some("8080"));
    assert_eq!(o.get("external_hostname").map(String::as_str), Some(""));
}

#[test]
fn resources_resolve_relative_to_model() {
    let m = HostModel::load(&write_model()).unwrap();
    let bytes = m.fetch("gitlab_image").unwrap();
    assert!(String::from_utf8(bytes).unwrap().starts_with("registrypath"));
    let err = m.fetch("missing").unwrap_err();
    assert!(err.to_string().contains("not attached"));
}

#[test]
fn announcements_persist_in_local_bag() {
    let path = write_model();
    let m = HostModel::load(&path).unwrap();
    let web = m.relations("website").remove(0);
    m.announce(&web, "git.example.com", 8080);
    m.save().unwrap();

    let again = HostModel::load(&path).unwrap();
    let bag = again.data_bag(&web, Participant::LocalUnit);
    assert_eq!(bag.get(HOSTNAME_KEY).map(String::as_str), Some("git.example.com"));
    assert_eq!(bag.get(PORT_KEY).map(String::as_str), Some("8080"));
    assert_eq!(bag.get("ingress-address").map(String::as_str), Some("10.1.1.1"));
}
