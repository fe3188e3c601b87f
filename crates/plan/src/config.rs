//! Platform configuration bundle (`cdap-site.xml`).

use std::collections::BTreeMap;

use tarn_core::{ConfigBundleSpec, Naming, Platform, ServiceKind};

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render properties as a Hadoop-style configuration document, sorted by key.
pub fn render_site_xml(props: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<configuration>\n");
    for (k, v) in props {
        xml.push_str("  <property>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape(k)));
        xml.push_str(&format!("    <value>{}</value>\n", escape(v)));
        xml.push_str("  </property>\n");
    }
    xml.push_str("</configuration>\n");
    xml
}

pub(crate) fn bundle(platform: &Platform, naming: &Naming, name: &str) -> ConfigBundleSpec {
    let mut props = BTreeMap::new();
    props.insert("router.server.address".to_string(), naming.object_name(ServiceKind::Router.name()));
    props.insert("router.bind.port".to_string(), crate::router_port(platform).to_string());
    props.insert("master.service.k8s.instance".to_string(), naming.instance.clone());
    // user settings win over derived ones
    props.extend(platform.spec.config.clone());
    ConfigBundleSpec {
        name: name.to_string(),
        labels: naming.instance_labels(),
        data: BTreeMap::from([(tarn_core::CONFIG_FILE.to_string(), render_site_xml(&props))]),
    }
}
