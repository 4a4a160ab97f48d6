use crate::recipe::Recipe;

/**
    Render a recipe as a Containerfile (Dockerfile syntax), one block per
    stage, in build order.
*/
pub fn render_containerfile(recipe: &Recipe) -> String {
    let mut out = String::from("# syntax=docker/dockerfile:1\n");
    for stage in recipe.stages() {
        out.push('\n');
        for line in stage.instructions() {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::tests::{python_context, python_recipe};

    #[test]
    fn renders_python_service_recipe() {
        let dir = python_context();
        let rendered = render_containerfile(&python_recipe(dir.path()));

        let expected = r#"# syntax=docker/dockerfile:1

FROM python:3.11-slim

WORKDIR /app

RUN apt-get update && apt-get install -y --no-install-recommends ffmpeg && rm -rf /var/lib/apt/lists/*

COPY requirements.txt requirements.txt

RUN pip install --no-cache-dir -r requirements.txt

COPY . .

EXPOSE 8000

CMD ["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000"]
"#;
        assert_eq!(rendered, expected);
    }
}
