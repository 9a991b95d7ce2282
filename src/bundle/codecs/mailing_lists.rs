use super::{CodecContext, DomainCodec, Exported};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::MailingList;
use crate::project::Collection;

const ROOT: &str = "mailinglists";
const RECORD: &str = "mailinglist";

pub struct MailingListCodec;

fn list_from(element: &Element) -> Result<MailingList, String> {
    let required = |key: &str| {
        element
            .required(key)
            .map(str::to_string)
            .map_err(|e| e.to_string())
    };
    Ok(MailingList {
        name: required("name")?,
        email: required("email")?,
        description: element.text().map(str::to_string),
        private: element.flag("private", false).map_err(|e| e.to_string())?,
        postperm: required("postperm")?,
        replyto: required("replyto")?,
    })
}

#[rocket::async_trait]
impl DomainCodec for MailingListCodec {
    fn domain(&self) -> Domain {
        Domain::MailingLists
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document(ROOT);
        let mut names = Vec::new();
        for list in ctx.project.mailing_lists().await? {
            root.push(
                Element::new(RECORD)
                    .with_attr("name", list.name.as_str())
                    .with_attr("email", list.email.as_str())
                    .with_attr("private", if list.private { "1" } else { "0" })
                    .with_attr("postperm", list.postperm.as_str())
                    .with_attr("replyto", list.replyto.as_str())
                    .with_opt_text(list.description.as_deref()),
            );
            names.push(list.name);
        }
        ctx.write_artifact(Domain::MailingLists, &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::MailingLists).await? else {
            return Ok(0);
        };
        let artifact = Domain::MailingLists.manifest_entry();
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact, e))?;
        let lists = root
            .children_named(RECORD)
            .map(|element| list_from(element).map_err(|e| BundleError::malformed(artifact, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::MailingLists).await?;
        for list in &lists {
            unit.insert_mailing_list(list).await?;
        }
        unit.commit().await?;
        Ok(lists.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::test_util::Fixture;
    use crate::project::MemoryProject;

    #[tokio::test]
    async fn lists_round_trip_with_privacy() {
        let fixture = Fixture::new();
        let source = MemoryProject::new("alpha", "/nonexistent");
        source.seed(|state| {
            state.mailing_lists = vec![
                MailingList {
                    name: "dev".into(),
                    email: "dev@example.org".into(),
                    description: Some("developer talk".into()),
                    private: true,
                    postperm: "MEMBERS".into(),
                    replyto: "LIST".into(),
                },
                MailingList {
                    name: "announce".into(),
                    email: "announce@example.org".into(),
                    description: None,
                    private: false,
                    postperm: "RESTRICTED".into(),
                    replyto: "SENDER".into(),
                },
            ];
        });
        MailingListCodec.export(&fixture.ctx(&source)).await.unwrap();

        let target = MemoryProject::new("beta", "/nonexistent");
        assert_eq!(MailingListCodec.import(&fixture.ctx(&target)).await.unwrap(), 2);
        assert_eq!(target.state().mailing_lists, source.state().mailing_lists);
    }

    #[tokio::test]
    async fn private_defaults_to_false_and_email_is_required() {
        let fixture = Fixture::new();
        let target = MemoryProject::new("beta", "/nonexistent");

        std::fs::write(
            fixture.bundle.join("mailinglist.xml"),
            r#"<mailinglists><mailinglist name="dev" email="d@x.org" postperm="ALL" replyto="LIST"/></mailinglists>"#,
        )
        .unwrap();
        MailingListCodec.import(&fixture.ctx(&target)).await.unwrap();
        assert!(!target.state().mailing_lists[0].private);

        std::fs::write(
            fixture.bundle.join("mailinglist.xml"),
            r#"<mailinglists><mailinglist name="dev" postperm="ALL" replyto="LIST"/></mailinglists>"#,
        )
        .unwrap();
        let err = MailingListCodec.import(&fixture.ctx(&target)).await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedArtifact { .. }));
    }
}
