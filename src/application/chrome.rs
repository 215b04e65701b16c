use crate::domain::entities::UserRecord;
use crate::presentation::views::{
    BrandView, LayoutChrome, NavigationLinkView, NavigationView, PageMetaView, ViewerView,
    profile_href,
};

/// Builds the header and navigation shared by every public page.
#[derive(Clone)]
pub struct ChromeService {
    site_title: String,
    login_url: String,
}

impl ChromeService {
    pub fn new(site_title: impl Into<String>, login_url: impl Into<String>) -> Self {
        Self {
            site_title: site_title.into(),
            login_url: login_url.into(),
        }
    }

    pub fn load(&self, viewer: Option<&UserRecord>) -> LayoutChrome {
        let mut entries = vec![link("Home", "/")];
        match viewer {
            Some(_) => {
                entries.push(link("New post", "/create"));
                entries.push(link("Following", "/follow"));
            }
            None => entries.push(link("Log in", &self.login_url)),
        }

        LayoutChrome {
            brand: BrandView {
                title: self.site_title.clone(),
                href: "/".to_string(),
            },
            navigation: NavigationView { entries },
            meta: PageMetaView {
                title: self.site_title.clone(),
            },
            viewer: viewer.map(|user| ViewerView {
                username: user.username.clone(),
                profile_href: profile_href(&user.username),
            }),
        }
    }
}

fn link(label: &str, href: &str) -> NavigationLinkView {
    NavigationLinkView {
        label: label.to_string(),
        href: href.to_string(),
    }
}
