//! Human-facing output: list tables, lookup YAML and input templates.

use std::io::Write;

use anyhow::Result;
use tabled::builder::Builder;
use tabled::settings::Style;

use enc_table::query::display_value;
use enc_table::{Classification, NodeRecord, TableSchema};

/// Prints `records` as a table under the list projection headers.
pub fn list_table(schema: &TableSchema, records: &[NodeRecord], out: &mut impl Write) -> Result<()> {
    let mut builder = Builder::default();
    builder.push_record(schema.list_projection()?.into_iter().map(String::from));
    for record in records {
        builder.push_record(
            record
                .fields()
                .map(|(_, value)| display_value(value).unwrap_or_default()),
        );
    }
    let mut table = builder.build();
    table.with(Style::psql());
    writeln!(out, "{table}")?;
    Ok(())
}

/// Prints the classification as a YAML document.
pub fn classification(enc: &Classification, out: &mut impl Write) -> Result<()> {
    writeln!(out, "---")?;
    write!(out, "{}", serde_yaml::to_string(enc)?)?;
    Ok(())
}

/// YAML change-set template with one placeholder per column.
pub fn yaml_template(schema: &TableSchema, out: &mut impl Write) -> Result<()> {
    let pk = schema.primary_key()?;
    writeln!(out, "---")?;
    writeln!(out, "<{}>:", pk.to_uppercase())?;
    for col in schema.column_names() {
        writeln!(out, "    {col}: <VALUE>")?;
    }
    writeln!(out)?;
    writeln!(out, "# When adding new nodes, omitted parameters will use database defaults.")?;
    writeln!(out, "# When changing nodes, omitted parameters will retain current value.")?;
    writeln!(out, "# The parameter matching the database primary key (\"{pk}\")")?;
    writeln!(out, "# is redundant and can be omitted unless intent is to change that value.")?;
    Ok(())
}

/// CSV change-set template: the header row plus a placeholder row.
pub fn csv_template(schema: &TableSchema, out: &mut impl Write) -> Result<()> {
    let cols: Vec<&str> = schema.column_names().collect();
    let placeholders: Vec<String> = cols.iter().map(|c| format!("<{}>", c.to_uppercase())).collect();
    writeln!(out, "{}", cols.join(","))?;
    writeln!(out, "{}", placeholders.join(","))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn schema() -> TableSchema {
        TableSchema::from_descriptor_str(
            "Nodes:\n  table_name: nodes\n  columns:\n    fqdn: [TEXT, PRIMARY KEY]\n    role: [TEXT]\n",
        )
        .unwrap()
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_csv_template() {
        let text = render(|out| csv_template(&schema(), out));
        assert_eq!(text, "fqdn,role\n<FQDN>,<ROLE>\n");
    }

    #[test]
    fn test_yaml_template_starts_with_primary_key_placeholder() {
        let text = render(|out| yaml_template(&schema(), out));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[..4], &["---", "<FQDN>:", "    fqdn: <VALUE>", "    role: <VALUE>"]);
    }

    #[test]
    fn test_classification_yaml() {
        let enc = Classification {
            classes: Some(vec!["role::web".to_string()]),
            environment: Some("production".to_string()),
            parameters: BTreeMap::from([
                ("enc_hostname".to_string(), "a.example.com".to_string()),
                ("role".to_string(), "web".to_string()),
            ]),
        };
        let text = render(|out| classification(&enc, out));
        assert!(text.starts_with("---\n"));
        let classes = text.find("classes:").unwrap();
        let environment = text.find("environment:").unwrap();
        let parameters = text.find("parameters:").unwrap();
        assert!(classes < environment && environment < parameters);

        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(doc["classes"][0].as_str(), Some("role::web"));
        assert_eq!(doc["environment"].as_str(), Some("production"));
        assert_eq!(doc["parameters"]["enc_hostname"].as_str(), Some("a.example.com"));
    }

    #[test]
    fn test_not_found_has_no_environment() {
        let enc = Classification {
            classes: Some(vec!["role::hostname_not_found".to_string()]),
            environment: None,
            parameters: BTreeMap::from([("enc_hostname".to_string(), "x".to_string())]),
        };
        let text = render(|out| classification(&enc, out));
        assert!(!text.contains("environment"));
    }
}
