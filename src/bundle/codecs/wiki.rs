use super::{CodecContext, DomainCodec, Exported};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::WikiPage;
use crate::project::Collection;

const ROOT: &str = "wiki";
const RECORD: &str = "page";

pub struct WikiCodec;

fn page_from(element: &Element) -> Result<WikiPage, String> {
    let name = element.required("name").map_err(|e| e.to_string())?;
    Ok(WikiPage {
        name: name.to_string(),
        readonly: element.flag("readonly", false).map_err(|e| e.to_string())?,
        author: element.attr("author").map(str::to_string),
        text: element.text().unwrap_or_default().to_string(),
    })
}

#[rocket::async_trait]
impl DomainCodec for WikiCodec {
    fn domain(&self) -> Domain {
        Domain::Wiki
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let pages = ctx.project.wiki_pages().await?;
        let mut root = ctx.document(ROOT);
        let mut names = Vec::new();

        for page in pages {
            if page.text.trim().is_empty() {
                log::debug!("skipping empty wiki page {}", page.name);
                continue;
            }
            root.push(
                Element::new(RECORD)
                    .with_attr("name", page.name.as_str())
                    .with_attr("readonly", if page.readonly { "1" } else { "0" })
                    .with_opt_attr("author", page.author.as_deref())
                    .with_text(page.text.as_str()),
            );
            names.push(page.name);
        }

        ctx.write_artifact(Domain::Wiki, &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::Wiki).await? else {
            return Ok(0);
        };
        let artifact = Domain::Wiki.manifest_entry();
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact, e))?;

        let mut pages = Vec::new();
        for element in root.children_named(RECORD) {
            let page = page_from(element).map_err(|e| BundleError::malformed(artifact, e))?;
            if page.text.trim().is_empty() {
                continue;
            }
            pages.push(page);
        }

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::WikiPages).await?;
        for page in &pages {
            unit.create_wiki_page(page).await?;
        }
        unit.commit().await?;
        Ok(pages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::test_util::Fixture;
    use crate::project::MemoryProject;

    fn page(name: &str, text: &str) -> WikiPage {
        WikiPage {
            name: name.to_string(),
            readonly: name == "WikiStart",
            author: Some("admin".into()),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_pages_are_neither_exported_nor_imported() {
        let fixture = Fixture::new();
        let source = MemoryProject::new("alpha", "/nonexistent");
        source.seed(|state| {
            for p in [page("WikiStart", "Welcome"), page("Blank", "   \n"), page("Guide/Install", "Run it")] {
                state.wiki.insert(p.name.clone(), p);
            }
        });

        let exported = WikiCodec.export(&fixture.ctx(&source)).await.unwrap();
        assert_eq!(exported.identifiers, vec!["Guide/Install", "WikiStart"]);

        let target = MemoryProject::new("beta", "/nonexistent");
        target.seed(|state| {
            state.wiki.insert("Stale".into(), page("Stale", "old"));
        });
        let applied = WikiCodec.import(&fixture.ctx(&target)).await.unwrap();
        assert_eq!(applied, 2);

        let state = target.state();
        assert_eq!(state.wiki.keys().collect::<Vec<_>>(), vec!["Guide/Install", "WikiStart"]);
        assert!(state.wiki["WikiStart"].readonly);
        assert_eq!(state.wiki["Guide/Install"].author.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn absent_artifact_applies_nothing() {
        let fixture = Fixture::new();
        let target = MemoryProject::new("beta", "/nonexistent");
        assert_eq!(WikiCodec.import(&fixture.ctx(&target)).await.unwrap(), 0);
        assert!(target.journal().is_empty());
    }

    #[tokio::test]
    async fn page_without_name_is_malformed() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.bundle.join("wiki.xml"),
            r#"<wiki project="alpha" date="2024-01-01"><page>text</page></wiki>"#,
        )
        .unwrap();
        let target = MemoryProject::new("beta", "/nonexistent");

        let err = WikiCodec.import(&fixture.ctx(&target)).await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedArtifact { ref artifact, .. } if artifact == "wiki"));
    }
}
