use inkwell_authz::posts::{NewPost, PostChanges};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Post creation request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 10000))]
    pub content: Option<String>,

    #[serde(default)]
    pub published: bool,
}

impl From<CreatePostRequest> for NewPost {
    fn from(req: CreatePostRequest) -> Self {
        NewPost {
            title: req.title,
            content: req.content,
            published: req.published,
        }
    }
}

/// Partial post update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,

    #[serde(default)]
    #[validate(length(max = 10000))]
    pub content: Option<String>,

    #[serde(default)]
    pub published: Option<bool>,
}

impl From<UpdatePostRequest> for PostChanges {
    fn from(req: UpdatePostRequest) -> Self {
        PostChanges {
            title: req.title,
            content: req.content,
            published: req.published,
        }
    }
}

/// Post listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPostsResponse<T> {
    pub posts: Vec<T>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let valid = CreatePostRequest {
            title: "Hello".to_string(),
            content: None,
            published: false,
        };
        assert!(valid.validate().is_ok());

        let empty_title = CreatePostRequest {
            title: String::new(),
            ..valid
        };
        assert!(empty_title.validate().is_err());
    }

    #[test]
    fn test_update_request_skips_absent_fields() {
        let req: UpdatePostRequest = serde_json::from_str(r#"{"published": true}"#).unwrap();
        assert!(req.validate().is_ok());

        let changes = PostChanges::from(req);
        assert_eq!(changes.published, Some(true));
        assert_eq!(changes.title, None);
    }

    #[test]
    fn test_update_rejects_blank_title() {
        let req = UpdatePostRequest {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
