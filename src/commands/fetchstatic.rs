//! `gl fetchstatic`: cache users, active milestones and labels.

use super::{Output, Session, render_json};
use crate::Result;
use crate::gitlab::Scope;
use crate::models::{Label, Milestone, User};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
pub struct StaticReport {
    pub users: usize,
    pub milestones: usize,
    pub labels: usize,
    pub files: Vec<String>,
}

impl Output for StaticReport {
    fn to_json(&self) -> String {
        render_json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "{} users, {} milestones, {} labels\n{}",
            self.users,
            self.milestones,
            self.labels,
            self.files.join("\n")
        )
    }
}

/// Keep the first item of each key.
fn dedup_by<T, K: std::hash::Hash + Eq>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Download the project's (and configured group's) reference data.
pub fn fetchstatic(session: &Session) -> Result<StaticReport> {
    let forge = session.forge()?;
    let mut scopes = vec![Scope::Project];
    if let Some(group) = session.settings.group() {
        scopes.push(Scope::Group(group.to_string()));
    }

    let mut users: Vec<User> = Vec::new();
    let mut milestones: Vec<Milestone> = Vec::new();
    let mut labels: Vec<Label> = Vec::new();
    for scope in &scopes {
        tracing::debug!(?scope, "fetching reference data");
        users.extend(forge.list_users(scope)?);
        milestones.extend(forge.list_milestones(scope)?);
        labels.extend(forge.list_labels(scope)?);
    }
    let users = dedup_by(users, |u| u.id);
    let milestones = dedup_by(milestones, |m| m.id);
    let labels = dedup_by(labels, |l| l.name.clone());

    let files = [
        session.workspace.store_static("users", &users)?,
        session.workspace.store_static("milestones", &milestones)?,
        session.workspace.store_static("labels", &labels)?,
    ]
    .iter()
    .map(|path| session.display_path(path))
    .collect();

    Ok(StaticReport {
        users: users.len(),
        milestones: milestones.len(),
        labels: labels.len(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::git::Git;
    use crate::gitlab::MemoryForge;
    use crate::merge::GitMergeFile;
    use tempfile::TempDir;

    #[test]
    fn test_fetchstatic_stores_and_dedups() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path(), &[("GITLAB_GROUP", "platform")], false);
        let me = User {
            id: 1,
            username: "me".to_string(),
            name: "Me".to_string(),
        };
        let forge = MemoryForge::new(&me);
        forge.set_static(
            vec![me.clone()],
            vec![Milestone {
                id: 4,
                title: "v1".to_string(),
            }],
            vec![Label {
                id: 9,
                name: "bug".to_string(),
            }],
        );
        let git = Git::new(temp.path());
        let launcher = RecordingLauncher::default();
        let session = Session::new(&settings, &git, &GitMergeFile, &launcher).with_forge(&forge);

        // The double answers both scopes with the same data.
        let report = fetchstatic(&session).unwrap();
        assert_eq!((report.users, report.milestones, report.labels), (1, 1, 1));
        assert_eq!(
            report.files,
            vec!["gl/users.json", "gl/milestones.json", "gl/labels.json"]
        );
        assert_eq!(session.users().unwrap(), vec![me]);
    }
}
